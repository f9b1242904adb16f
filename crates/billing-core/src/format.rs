//! Subscription Formatting
//!
//! Turns provider objects into the shape the storefront displays. Lookups
//! made here only enrich the output: when they fail the view falls back to
//! a placeholder and the failure is logged.

use chrono::DateTime;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::model::{
    BillingInterval, BillingPrice, BillingSubscription, PaymentMethod, PaymentMethodRef, ProductRef,
};
use crate::provider::BillingProvider;

/// Plan name when a subscription has no price
pub const UNKNOWN_PLAN: &str = "Unknown Plan";

/// Card details for display
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CardView {
    pub brand: String,
    pub last4: String,
    pub exp_month: i64,
    pub exp_year: i64,
}

/// Payment method for display
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PaymentMethodView {
    pub id: String,
    pub kind: String,
    pub card: Option<CardView>,
}

impl PaymentMethodView {
    /// Shown when the payment method could not be fetched
    pub fn unknown(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: "unknown".into(),
            card: None,
        }
    }
}

impl From<&PaymentMethod> for PaymentMethodView {
    fn from(pm: &PaymentMethod) -> Self {
        let card = if pm.kind == "card" {
            pm.card.as_ref().map(|card| CardView {
                brand: card.brand.clone(),
                last4: card.last4.clone(),
                exp_month: card.exp_month,
                exp_year: card.exp_year,
            })
        } else {
            None
        };
        Self {
            id: pm.id.clone(),
            kind: pm.kind.clone(),
            card,
        }
    }
}

/// Subscription for display
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubscriptionView {
    pub id: String,
    pub status: String,
    pub plan_name: String,
    pub current_period_start: String,
    pub current_period_end: String,
    pub amount: Decimal,
    /// Upper-case ISO currency
    pub currency: String,
    /// `monthly` or `yearly`
    pub billing_period: String,
    pub cancel_at_period_end: bool,
    pub payment_method: Option<PaymentMethodView>,
}

/// Minor units to major units, assuming two decimal places
pub fn minor_to_major(unit_amount: i64) -> Decimal {
    Decimal::new(unit_amount, 2)
}

/// `YYYY-MM-DD HH:MM:SS`, UTC
pub fn format_timestamp(unix_seconds: i64) -> String {
    DateTime::from_timestamp(unix_seconds, 0)
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// `yearly` for yearly prices, `monthly` for everything else
pub fn billing_period(price: Option<&BillingPrice>) -> &'static str {
    match price.and_then(|p| p.interval) {
        Some(BillingInterval::Year) => BillingInterval::Year.period_label(),
        _ => BillingInterval::Month.period_label(),
    }
}

/// Formats subscriptions, fetching missing names from the provider
pub struct SubscriptionFormatter<'a> {
    provider: &'a dyn BillingProvider,
    default_currency: &'a str,
}

impl<'a> SubscriptionFormatter<'a> {
    pub fn new(provider: &'a dyn BillingProvider, default_currency: &'a str) -> Self {
        Self {
            provider,
            default_currency,
        }
    }

    pub async fn format(&self, subscription: &BillingSubscription) -> SubscriptionView {
        let price = subscription.price();
        SubscriptionView {
            id: subscription.id.clone(),
            status: subscription.status.to_string(),
            plan_name: self.plan_name(price).await,
            current_period_start: format_timestamp(subscription.current_period_start),
            current_period_end: format_timestamp(subscription.current_period_end),
            amount: price.and_then(|p| p.unit_amount).map_or(Decimal::ZERO, minor_to_major),
            currency: price.map_or(self.default_currency, |p| p.currency.as_str()).to_uppercase(),
            billing_period: billing_period(price).to_string(),
            cancel_at_period_end: subscription.cancel_at_period_end,
            payment_method: self.payment_method(subscription.default_payment_method.as_ref()).await,
        }
    }

    /// Nickname, then product name, then product id
    pub async fn plan_name(&self, price: Option<&BillingPrice>) -> String {
        let Some(price) = price else {
            return UNKNOWN_PLAN.to_string();
        };
        if let Some(nickname) = price.nickname.as_deref().filter(|n| !n.trim().is_empty()) {
            return nickname.to_string();
        }

        match &price.product {
            Some(ProductRef::Expanded { name: Some(name), .. }) => name.clone(),
            Some(product) => match self.provider.product_name(product.id()).await {
                Ok(name) => name,
                Err(e) => {
                    tracing::warn!(product_id = %product.id(), error = %e, "Product lookup failed");
                    product.id().to_string()
                }
            },
            None => UNKNOWN_PLAN.to_string(),
        }
    }

    pub async fn payment_method(
        &self,
        payment_method: Option<&PaymentMethodRef>,
    ) -> Option<PaymentMethodView> {
        match payment_method? {
            PaymentMethodRef::Expanded(pm) => Some(pm.into()),
            PaymentMethodRef::Id(id) => match self.provider.retrieve_payment_method(id).await {
                Ok(pm) => Some((&pm).into()),
                Err(e) => {
                    tracing::warn!(
                        payment_method_id = %id,
                        error = %e,
                        "Payment method lookup failed"
                    );
                    Some(PaymentMethodView::unknown(id))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CardDetails, SubscriptionStatus};
    use crate::provider::MemoryBillingProvider;
    use rust_decimal_macros::dec;

    fn card(id: &str) -> PaymentMethod {
        PaymentMethod {
            id: id.into(),
            kind: "card".into(),
            customer: Some("cus_1".into()),
            card: Some(CardDetails {
                brand: "visa".into(),
                last4: "4242".into(),
                exp_month: 12,
                exp_year: 2030,
            }),
        }
    }

    #[test]
    fn test_amounts_and_dates() {
        assert_eq!(minor_to_major(2999), dec!(29.99));
        assert_eq!(minor_to_major(0), Decimal::ZERO);
        assert_eq!(format_timestamp(1_700_000_000), "2023-11-14 22:13:20");
    }

    #[tokio::test]
    async fn test_full_view() {
        let provider = MemoryBillingProvider::new();
        let mut price = BillingPrice::recurring("price_1", "brl", 2999, BillingInterval::Year);
        price.product = Some(ProductRef::Expanded {
            id: "prod_1".into(),
            name: Some("Pro Plan Annual".into()),
        });
        let mut sub = BillingSubscription::new("sub_1", "cus_1", SubscriptionStatus::Active)
            .with_price(price);
        sub.current_period_start = 1_700_000_000;
        sub.default_payment_method = Some(PaymentMethodRef::Expanded(card("pm_1")));

        let view = SubscriptionFormatter::new(&provider, "brl").format(&sub).await;
        assert_eq!(view.plan_name, "Pro Plan Annual");
        assert_eq!(view.amount, dec!(29.99));
        assert_eq!(view.currency, "BRL");
        assert_eq!(view.billing_period, "yearly");
        assert_eq!(view.status, "active");
        assert_eq!(view.current_period_start, "2023-11-14 22:13:20");
        let pm = view.payment_method.unwrap();
        assert_eq!(pm.card.unwrap().last4, "4242");
    }

    #[tokio::test]
    async fn test_plan_name_fallbacks() {
        let provider = MemoryBillingProvider::new();
        provider.add_product("prod_known", "Basic Plan Monthly");
        let formatter = SubscriptionFormatter::new(&provider, "brl");

        assert_eq!(formatter.plan_name(None).await, UNKNOWN_PLAN);

        let mut price = BillingPrice::recurring("price_1", "brl", 100, BillingInterval::Month);
        price.nickname = Some("Launch offer".into());
        assert_eq!(formatter.plan_name(Some(&price)).await, "Launch offer");

        price.nickname = None;
        price.product = Some(ProductRef::Id("prod_known".into()));
        assert_eq!(formatter.plan_name(Some(&price)).await, "Basic Plan Monthly");

        price.product = Some(ProductRef::Id("prod_gone".into()));
        assert_eq!(formatter.plan_name(Some(&price)).await, "prod_gone");
    }

    #[tokio::test]
    async fn test_missing_price_and_payment_method() {
        let provider = MemoryBillingProvider::new();
        let mut sub = BillingSubscription::new("sub_1", "cus_1", SubscriptionStatus::Canceled);
        sub.default_payment_method = Some(PaymentMethodRef::Id("pm_gone".into()));

        let view = SubscriptionFormatter::new(&provider, "brl").format(&sub).await;
        assert_eq!(view.plan_name, UNKNOWN_PLAN);
        assert_eq!(view.amount, Decimal::ZERO);
        assert_eq!(view.currency, "BRL");
        assert_eq!(view.billing_period, "monthly");
        assert_eq!(view.payment_method, Some(PaymentMethodView::unknown("pm_gone")));
    }
}
