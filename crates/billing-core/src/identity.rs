//! Caller identity

use async_trait::async_trait;

use crate::error::{BillingError, Result};
use crate::model::LocalUser;

/// Supplies the authenticated store user for the current request
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Fails with [`BillingError::Unauthenticated`] when nobody is signed in
    async fn current_user(&self) -> Result<LocalUser>;
}

/// Fixed identity (tests, CLI tooling)
#[derive(Clone, Debug, Default)]
pub struct StaticIdentity {
    user: Option<LocalUser>,
}

impl StaticIdentity {
    pub fn user(user: LocalUser) -> Self {
        Self { user: Some(user) }
    }

    pub fn anonymous() -> Self {
        Self { user: None }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user(&self) -> Result<LocalUser> {
        self.user.clone().ok_or(BillingError::Unauthenticated)
    }
}
