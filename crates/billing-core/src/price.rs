//! Price Resolution
//!
//! Finds the recurring price for (product, interval, currency), creating it
//! on first use. Deduplication is search-before-create only: two requests
//! racing on a brand-new product can both create a price, and later
//! searches then return the first one the provider lists.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{BillingError, Result};
use crate::model::{BillingInterval, BillingPrice, Product};
use crate::provider::{BillingProvider, NewPrice, PriceQuery};

/// Lowercase; spaces and hyphens become underscores.
pub fn normalize_sku(sku: &str) -> String {
    sku.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

/// Major units to minor units, rounded half away from zero
pub fn to_minor_units(amount: Decimal) -> Result<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .filter(|minor| *minor >= 0)
        .ok_or_else(|| BillingError::invalid(format!("Price {amount} cannot be billed")))
}

/// Search-then-create price lookup
pub struct PriceResolver {
    provider: Arc<dyn BillingProvider>,
}

impl PriceResolver {
    pub fn new(provider: Arc<dyn BillingProvider>) -> Self {
        Self { provider }
    }

    /// Price id for `product` billed every `interval` in `currency`
    pub async fn resolve_price_id(
        &self,
        product: &Product,
        interval: BillingInterval,
        currency: &str,
    ) -> Result<String> {
        let query = PriceQuery {
            product_sku: normalize_sku(&product.sku),
            interval,
            currency: currency.to_lowercase(),
        };

        if let Some(existing) = self.find_existing(&query).await {
            tracing::debug!(
                price_id = %existing.id,
                sku = %query.product_sku,
                "Reusing billing price"
            );
            return Ok(existing.id);
        }

        let created = self.provider.create_price(new_price(product, &query)?).await?;
        tracing::info!(
            price_id = %created.id,
            sku = %query.product_sku,
            interval = %interval,
            currency = %query.currency,
            "Created billing price"
        );
        Ok(created.id)
    }

    /// A failed search counts as no match.
    async fn find_existing(&self, query: &PriceQuery) -> Option<BillingPrice> {
        let prices = match self.provider.search_prices(query).await {
            Ok(prices) => prices,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    sku = %query.product_sku,
                    "Price search failed, creating instead"
                );
                return None;
            }
        };

        prices.into_iter().find(|price| {
            let period = price.metadata.get("billing_period").map(String::as_str);
            price.metadata.get("product_sku") == Some(&query.product_sku)
                && period == Some(query.interval.as_str())
                && price.currency.eq_ignore_ascii_case(&query.currency)
        })
    }
}

fn new_price(product: &Product, query: &PriceQuery) -> Result<NewPrice> {
    let mut product_metadata = HashMap::from([
        ("product_sku".to_string(), query.product_sku.clone()),
        ("product_id".to_string(), product.id.clone()),
    ]);
    if let Some(description) = product
        .short_description
        .as_deref()
        .filter(|d| !d.trim().is_empty())
    {
        product_metadata.insert("description".into(), description.to_string());
    }

    Ok(NewPrice {
        currency: query.currency.clone(),
        unit_amount: to_minor_units(product.price)?,
        interval: query.interval,
        product_name: product.name.clone(),
        product_metadata,
        metadata: HashMap::from([
            ("product_sku".to_string(), query.product_sku.clone()),
            ("product_id".to_string(), product.id.clone()),
            ("billing_period".to_string(), query.interval.as_str().to_string()),
        ]),
    })
}
