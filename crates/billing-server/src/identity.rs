//! Caller identity forwarded by the storefront gateway

use async_trait::async_trait;
use axum::http::HeaderMap;
use billing_core::{BillingError, IdentityProvider, LocalUser, Result};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// Identity taken from `x-user-id` / `x-user-email`
#[derive(Clone, Debug, Default)]
pub struct ForwardedIdentity {
    user: Option<LocalUser>,
}

impl ForwardedIdentity {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let user_id = header(USER_ID_HEADER)
            .and_then(|id| id.parse::<i64>().ok())
            .filter(|id| *id > 0);
        let user = match (user_id, header(USER_EMAIL_HEADER)) {
            (Some(user_id), Some(email)) => Some(LocalUser::new(user_id, email)),
            _ => None,
        };
        Self { user }
    }
}

#[async_trait]
impl IdentityProvider for ForwardedIdentity {
    async fn current_user(&self) -> Result<LocalUser> {
        self.user.clone().ok_or(BillingError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[tokio::test]
    async fn test_both_headers_required() {
        let identity = ForwardedIdentity::from_headers(&headers(&[
            (USER_ID_HEADER, "42"),
            (USER_EMAIL_HEADER, "ana@example.com"),
        ]));
        let user = identity.current_user().await.unwrap();
        assert_eq!(user.user_id, 42);
        assert_eq!(user.email, "ana@example.com");

        let missing_email = ForwardedIdentity::from_headers(&headers(&[(USER_ID_HEADER, "42")]));
        assert!(matches!(
            missing_email.current_user().await,
            Err(BillingError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_malformed_user_id() {
        for id in ["abc", "0", "-3"] {
            let identity = ForwardedIdentity::from_headers(&headers(&[
                (USER_ID_HEADER, id),
                (USER_EMAIL_HEADER, "ana@example.com"),
            ]));
            assert!(identity.current_user().await.is_err());
        }
    }
}
