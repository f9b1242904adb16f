//! Subscription Plans
//!
//! The public plan listing. Tier and period are read from the product name,
//! which is how the storefront names its plan products.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::catalog::Catalog;
use crate::config::BillingConfig;
use crate::error::Result;
use crate::model::{BillingInterval, Product};

/// Plan tier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Basic,
    Pro,
}

impl PlanTier {
    /// `Pro` when the name mentions "pro" anywhere
    pub fn from_name(name: &str) -> Self {
        if name.to_lowercase().contains("pro") {
            Self::Pro
        } else {
            Self::Basic
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Pro => "pro",
        }
    }

    pub fn features(self) -> &'static [&'static str] {
        match self {
            Self::Basic => &[
                "Up to 5 connected profiles",
                "10 automated posts per month",
                "Email support",
                "Basic templates",
                "Simple reports",
            ],
            Self::Pro => &[
                "Unlimited profiles",
                "Unlimited automated posts",
                "Priority support",
                "Premium templates",
                "Advanced reports",
                "Smart scheduling",
                "AI content assistant",
                "API access",
            ],
        }
    }
}

/// Billing interval implied by a product name
pub fn interval_from_name(name: &str) -> BillingInterval {
    let name = name.to_lowercase();
    if ["annual", "yearly", "anual"].iter().any(|word| name.contains(word)) {
        BillingInterval::Year
    } else {
        BillingInterval::Month
    }
}

/// A plan as listed on the pricing page
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubscriptionPlan {
    pub id: String,
    pub name: String,
    pub sku: String,
    pub price: Decimal,
    /// Upper-case ISO currency
    pub currency: String,
    pub billing_period: String,
    pub description: Option<String>,
    pub tier: PlanTier,
    pub features: Vec<String>,
    pub is_popular: bool,
}

impl SubscriptionPlan {
    pub fn from_product(product: &Product, currency: &str) -> Self {
        let tier = PlanTier::from_name(&product.name);
        let interval = interval_from_name(&product.name);
        Self {
            id: product.id.clone(),
            name: product.name.clone(),
            sku: product.sku.clone(),
            price: product.price,
            currency: currency.to_uppercase(),
            billing_period: interval.period_label().to_string(),
            description: product.short_description.clone(),
            tier,
            features: tier.features().iter().map(|f| (*f).to_string()).collect(),
            is_popular: tier == PlanTier::Pro && interval == BillingInterval::Year,
        }
    }
}

/// Plans from the catalog whose name contains the configured filter
pub async fn list_subscription_plans(
    catalog: &dyn Catalog,
    config: &BillingConfig,
) -> Result<Vec<SubscriptionPlan>> {
    let filter = config.plan_name_filter.as_deref().map(str::to_lowercase);
    let plans = catalog
        .list_products()
        .await?
        .iter()
        .filter(|p| filter.as_deref().is_none_or(|f| p.name.to_lowercase().contains(f)))
        .take(config.plan_page_size)
        .map(|p| SubscriptionPlan::from_product(p, &config.currency))
        .collect();
    Ok(plans)
}
