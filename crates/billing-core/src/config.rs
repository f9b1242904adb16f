//! Billing Configuration
//!
//! Explicit settings handed to the service at construction. Nothing in this
//! crate reads the environment; the server builds this from its own config.

use crate::error::{BillingError, Result};

/// Provider cap on subscription list page size
pub const MAX_SUBSCRIPTION_PAGE_SIZE: u8 = 100;

/// Settings shared by the resolvers and the service
#[derive(Clone, Debug)]
pub struct BillingConfig {
    /// Lowercase ISO currency for prices and formatting fallbacks
    pub currency: String,

    /// Storefront origin used to build checkout return URLs
    pub storefront_base_url: String,

    /// Catalog products whose name contains this are offered as plans
    pub plan_name_filter: Option<String>,

    /// Subscriptions listed per candidate customer
    pub subscription_page_size: u8,

    /// Plans returned by the plan listing
    pub plan_page_size: usize,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            currency: "brl".into(),
            storefront_base_url: "http://localhost:3000".into(),
            plan_name_filter: None,
            subscription_page_size: MAX_SUBSCRIPTION_PAGE_SIZE,
            plan_page_size: 10,
        }
    }
}

impl BillingConfig {
    /// Normalize and check the settings.
    pub fn validated(mut self) -> Result<Self> {
        self.currency = self.currency.trim().to_lowercase();
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(BillingError::ConfigurationMissing(format!(
                "billing currency must be a 3-letter ISO code, got '{}'",
                self.currency
            )));
        }

        self.storefront_base_url = self.storefront_base_url.trim_end_matches('/').to_string();
        if self.storefront_base_url.is_empty() {
            return Err(BillingError::ConfigurationMissing("storefront base URL".into()));
        }

        self.subscription_page_size = self
            .subscription_page_size
            .clamp(1, MAX_SUBSCRIPTION_PAGE_SIZE);
        self.plan_name_filter = self
            .plan_name_filter
            .map(|filter| filter.trim().to_string())
            .filter(|filter| !filter.is_empty());
        Ok(self)
    }

    /// `<storefront>/dashboard?subscription=<outcome>`
    pub fn dashboard_url(&self, outcome: &str) -> String {
        format!("{}/dashboard?subscription={outcome}", self.storefront_base_url)
    }
}
