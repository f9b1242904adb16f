//! Server configuration from the environment

use std::path::PathBuf;
use std::time::Duration;

use billing_core::BillingConfig;

const DEFAULT_ORIGINS: &str = "http://localhost:3000,http://127.0.0.1:3000";

/// Everything the server reads at startup
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub billing: BillingConfig,
    /// JSON product list; built-in plans when unset
    pub catalog_path: Option<PathBuf>,
    /// JSON mapping file; in-memory mappings when unset
    pub mapping_store_path: Option<PathBuf>,
    /// `*` allows any origin
    pub cors_allowed_origins: Vec<String>,
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
            billing: BillingConfig::default(),
            catalog_path: None,
            mapping_store_path: None,
            cors_allowed_origins: split_origins(DEFAULT_ORIGINS),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Read `BIND_ADDR`, `BILLING_CURRENCY`, `STOREFRONT_BASE_URL`,
    /// `PLAN_NAME_FILTER`, `CATALOG_PATH`, `MAPPING_STORE_PATH`,
    /// `CORS_ALLOWED_ORIGINS` and `REQUEST_TIMEOUT_SECS`.
    pub fn from_env() -> billing_core::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> billing_core::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let mut billing = BillingConfig::default();
        if let Some(currency) = var("BILLING_CURRENCY") {
            billing.currency = currency;
        }
        if let Some(url) = var("STOREFRONT_BASE_URL") {
            billing.storefront_base_url = url;
        }
        billing.plan_name_filter = var("PLAN_NAME_FILTER");

        let request_timeout = match var("REQUEST_TIMEOUT_SECS") {
            Some(secs) => secs
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or_else(|| {
                    billing_core::BillingError::invalid(format!("REQUEST_TIMEOUT_SECS: {secs}"))
                })?,
            None => defaults.request_timeout,
        };

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            billing: billing.validated()?,
            catalog_path: var("CATALOG_PATH").map(PathBuf::from),
            mapping_store_path: var("MAPPING_STORE_PATH").map(PathBuf::from),
            cors_allowed_origins: var("CORS_ALLOWED_ORIGINS")
                .map(|raw| split_origins(&raw))
                .unwrap_or(defaults.cors_allowed_origins),
            request_timeout,
        })
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|o| !o.is_empty()).map(String::from).collect()
}
