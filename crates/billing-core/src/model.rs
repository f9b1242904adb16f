//! Domain Models
//!
//! Provider-neutral views of customers, prices, subscriptions and payment
//! methods, plus the local user and catalog product they are reconciled with.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::BillingError;

/// Local (store) user id
pub type UserId = i64;

/// Metadata key linking a billing object back to its local user
pub const LOCAL_USER_ID_KEY: &str = "local_user_id";

/// The authenticated store user
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    pub user_id: UserId,
    pub email: String,
}

impl LocalUser {
    pub fn new(user_id: UserId, email: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
        }
    }
}

/// Persisted link between a local user and a billing customer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerMapping {
    pub user_id: UserId,
    pub billing_customer_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A customer record at the billing provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingCustomer {
    pub id: String,
    pub email: Option<String>,
}

/// Recurring interval of a price
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Month,
    Year,
}

impl BillingInterval {
    /// Provider-side interval name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// Period label shown to users
    pub fn period_label(self) -> &'static str {
        match self {
            Self::Month => "monthly",
            Self::Year => "yearly",
        }
    }
}

impl FromStr for BillingInterval {
    type Err = BillingError;

    /// Accepts the interval and period spellings the storefront sends.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "month" | "monthly" => Ok(Self::Month),
            "year" | "yearly" | "annual" | "annually" => Ok(Self::Year),
            other => Err(BillingError::invalid(format!(
                "Unsupported billing period '{other}', expected monthly or yearly"
            ))),
        }
    }
}

impl std::fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Product reference on a price: bare id or expanded
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductRef {
    Id(String),
    Expanded { id: String, name: Option<String> },
}

impl ProductRef {
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) | Self::Expanded { id, .. } => id,
        }
    }
}

/// A billing price
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPrice {
    pub id: String,
    /// Lowercase ISO currency
    pub currency: String,
    /// Minor units
    pub unit_amount: Option<i64>,
    pub nickname: Option<String>,
    pub product: Option<ProductRef>,
    pub interval: Option<BillingInterval>,
    pub metadata: HashMap<String, String>,
}

impl BillingPrice {
    /// Recurring price with no nickname, product or metadata
    pub fn recurring(
        id: impl Into<String>,
        currency: impl Into<String>,
        unit_amount: i64,
        interval: BillingInterval,
    ) -> Self {
        Self {
            id: id.into(),
            currency: currency.into().to_lowercase(),
            unit_amount: Some(unit_amount),
            nickname: None,
            product: None,
            interval: Some(interval),
            metadata: HashMap::new(),
        }
    }
}

/// Subscription lifecycle status as reported by the provider
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Incomplete,
    IncompleteExpired,
    Canceled,
    Unpaid,
    Paused,
}

impl SubscriptionStatus {
    /// Statuses that still count as a live agreement when selecting
    pub const VALID: [Self; 5] = [
        Self::Active,
        Self::Trialing,
        Self::PastDue,
        Self::Incomplete,
        Self::IncompleteExpired,
    ];

    pub fn is_valid(self) -> bool {
        Self::VALID.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Canceled => "canceled",
            Self::Unpaid => "unpaid",
            Self::Paused => "paused",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment method reference on a subscription
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethodRef {
    Id(String),
    Expanded(PaymentMethod),
}

impl PaymentMethodRef {
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) => id,
            Self::Expanded(pm) => &pm.id,
        }
    }
}

/// A recurring-billing agreement
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingSubscription {
    pub id: String,
    pub customer_id: String,
    pub status: SubscriptionStatus,
    pub metadata: HashMap<String, String>,
    /// Price of each subscription item, in item order
    pub items: Vec<BillingPrice>,
    /// Unix seconds
    pub current_period_start: i64,
    /// Unix seconds
    pub current_period_end: i64,
    pub cancel_at_period_end: bool,
    pub default_payment_method: Option<PaymentMethodRef>,
}

impl BillingSubscription {
    /// Subscription with no items, metadata or payment method
    pub fn new(
        id: impl Into<String>,
        customer_id: impl Into<String>,
        status: SubscriptionStatus,
    ) -> Self {
        Self {
            id: id.into(),
            customer_id: customer_id.into(),
            status,
            metadata: HashMap::new(),
            items: Vec::new(),
            current_period_start: 0,
            current_period_end: 0,
            cancel_at_period_end: false,
            default_payment_method: None,
        }
    }

    /// Tag with the local user id metadata
    pub fn with_local_user(mut self, user_id: UserId) -> Self {
        self.metadata.insert(LOCAL_USER_ID_KEY.into(), user_id.to_string());
        self
    }

    pub fn with_price(mut self, price: BillingPrice) -> Self {
        self.items.push(price);
        self
    }

    /// Price of the first item
    pub fn price(&self) -> Option<&BillingPrice> {
        self.items.first()
    }

    /// Whether metadata links this subscription to `user_id`
    pub fn belongs_to(&self, user_id: UserId) -> bool {
        self.metadata
            .get(LOCAL_USER_ID_KEY)
            .is_some_and(|value| value.trim() == user_id.to_string())
    }
}

/// Card details of a card payment method
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDetails {
    pub brand: String,
    pub last4: String,
    pub exp_month: i64,
    pub exp_year: i64,
}

/// A stored payment instrument
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: String,
    /// Provider type string (`card`, `boleto`, ...)
    pub kind: String,
    /// Billing customer it is attached to
    pub customer: Option<String>,
    pub card: Option<CardDetails>,
}

/// A confirmed (or pending) payment-method setup
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupIntent {
    pub id: String,
    pub customer: Option<String>,
    pub status: String,
    pub payment_method: Option<String>,
}

impl SetupIntent {
    pub fn is_succeeded(&self) -> bool {
        self.status == "succeeded"
    }
}

/// A hosted checkout session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// A catalog product that can be sold as a subscription plan
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub sku: String,
    pub name: String,
    /// Major units
    pub price: Decimal,
    #[serde(default)]
    pub short_description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_parsing() {
        assert_eq!("monthly".parse::<BillingInterval>().unwrap(), BillingInterval::Month);
        assert_eq!("Yearly".parse::<BillingInterval>().unwrap(), BillingInterval::Year);
        assert_eq!(" annual ".parse::<BillingInterval>().unwrap(), BillingInterval::Year);
        assert!("weekly".parse::<BillingInterval>().is_err());
    }

    #[test]
    fn test_valid_statuses() {
        assert!(SubscriptionStatus::PastDue.is_valid());
        assert!(SubscriptionStatus::IncompleteExpired.is_valid());
        assert!(!SubscriptionStatus::Canceled.is_valid());
        assert!(!SubscriptionStatus::Unpaid.is_valid());
        assert!(!SubscriptionStatus::Paused.is_valid());
    }

    #[test]
    fn test_belongs_to() {
        let sub = BillingSubscription::new("sub_1", "cus_1", SubscriptionStatus::Active)
            .with_local_user(42);
        assert!(sub.belongs_to(42));
        assert!(!sub.belongs_to(7));

        let untagged = BillingSubscription::new("sub_2", "cus_1", SubscriptionStatus::Active);
        assert!(!untagged.belongs_to(42));
    }
}
