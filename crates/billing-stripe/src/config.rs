//! Stripe credentials

use billing_core::{BillingError, Result};
use thiserror::Error;

const MIN_KEY_LENGTH: usize = 20;
const KEY_PREFIXES: [&str; 4] = ["sk_test_", "sk_live_", "rk_test_", "rk_live_"];

/// Rejected secret key
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid Stripe API key: {reason}")]
pub struct InvalidApiKey {
    pub reason: String,
}

/// Stripe connection settings
#[derive(Clone)]
pub struct StripeConfig {
    secret_key: String,
}

impl StripeConfig {
    pub fn new(secret_key: impl Into<String>) -> std::result::Result<Self, InvalidApiKey> {
        let secret_key = secret_key.into();
        validate_api_key(&secret_key)?;
        Ok(Self { secret_key })
    }

    /// Load from `STRIPE_SECRET_KEY`
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("STRIPE_SECRET_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| BillingError::ConfigurationMissing("STRIPE_SECRET_KEY not set".into()))?;
        Self::new(key.trim()).map_err(|e| BillingError::ConfigurationMissing(e.to_string()))
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    /// Test-mode keys never touch live data
    pub fn is_test_mode(&self) -> bool {
        self.secret_key.starts_with("sk_test_") || self.secret_key.starts_with("rk_test_")
    }
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[REDACTED]")
            .field("test_mode", &self.is_test_mode())
            .finish()
    }
}

fn validate_api_key(key: &str) -> std::result::Result<(), InvalidApiKey> {
    let reason = if key.is_empty() {
        "key is empty".to_string()
    } else if key.len() < MIN_KEY_LENGTH {
        format!("key too short (minimum {MIN_KEY_LENGTH} characters)")
    } else if !KEY_PREFIXES.iter().any(|prefix| key.starts_with(prefix)) {
        format!("key must start with one of {}", KEY_PREFIXES.join(", "))
    } else {
        return Ok(());
    };
    Err(InvalidApiKey { reason })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_validation() {
        assert!(StripeConfig::new("sk_test_51HxxxxxxxxxxxxxxxxX").is_ok());
        assert!(StripeConfig::new("rk_live_51HxxxxxxxxxxxxxxxxX").is_ok());

        let err = StripeConfig::new("").unwrap_err();
        assert!(err.reason.contains("empty"));
        let err = StripeConfig::new("sk_test_short").unwrap_err();
        assert!(err.reason.contains("too short"));
        let err = StripeConfig::new("pk_test_51HxxxxxxxxxxxxxxxxX").unwrap_err();
        assert!(err.reason.contains("must start with"));
    }

    #[test]
    fn test_debug_hides_key() {
        let config = StripeConfig::new("sk_test_51Hsupersecretvalue").unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("supersecret"));
        assert!(debug.contains("REDACTED"));
        assert!(config.is_test_mode());
    }
}
