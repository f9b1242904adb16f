//! Billing Provider Integration
//!
//! The remote system of record for customers, prices, subscriptions and
//! payment methods. Implementations translate their own failures into
//! [`ProviderError`](crate::error::ProviderError); nothing here retries.

mod memory;

pub use memory::MemoryBillingProvider;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;
use crate::model::{
    BillingCustomer, BillingInterval, BillingPrice, BillingSubscription, CheckoutSession,
    PaymentMethod, SetupIntent, UserId,
};

/// Provider operation names, used in errors and call counters
pub mod ops {
    pub const SEARCH_CUSTOMERS: &str = "customers.search";
    pub const CREATE_CUSTOMER: &str = "customers.create";
    pub const SEARCH_PRICES: &str = "prices.search";
    pub const CREATE_PRICE: &str = "prices.create";
    pub const LIST_SUBSCRIPTIONS: &str = "subscriptions.list";
    pub const RETRIEVE_SUBSCRIPTION: &str = "subscriptions.retrieve";
    pub const CREATE_SUBSCRIPTION: &str = "subscriptions.create";
    pub const UPDATE_SUBSCRIPTION: &str = "subscriptions.update";
    pub const CANCEL_SUBSCRIPTION: &str = "subscriptions.cancel";
    pub const RETRIEVE_PAYMENT_METHOD: &str = "payment_methods.retrieve";
    pub const ATTACH_PAYMENT_METHOD: &str = "payment_methods.attach";
    pub const LIST_PAYMENT_METHODS: &str = "payment_methods.list";
    pub const RETRIEVE_SETUP_INTENT: &str = "setup_intents.retrieve";
    pub const RETRIEVE_PRODUCT: &str = "products.retrieve";
    pub const CREATE_CHECKOUT_SESSION: &str = "checkout.sessions.create";
}

/// Customer to create
#[derive(Clone, Debug)]
pub struct NewCustomer {
    pub email: String,
    pub local_user_id: UserId,
}

/// Metadata-based price search
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriceQuery {
    /// Already normalized
    pub product_sku: String,
    pub interval: BillingInterval,
    /// Narrowing hint; callers still filter on currency themselves
    pub currency: String,
}

/// Recurring price to create, with inline product data
#[derive(Clone, Debug)]
pub struct NewPrice {
    pub currency: String,
    /// Minor units
    pub unit_amount: i64,
    pub interval: BillingInterval,
    pub product_name: String,
    pub product_metadata: HashMap<String, String>,
    pub metadata: HashMap<String, String>,
}

/// Subscription to create against an attached payment method
#[derive(Clone, Debug)]
pub struct NewSubscription {
    pub customer_id: String,
    pub price_id: String,
    pub default_payment_method: String,
    pub metadata: HashMap<String, String>,
}

/// Hosted checkout session in subscription mode
#[derive(Clone, Debug)]
pub struct NewCheckoutSession {
    pub customer_id: String,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
    pub allow_promotion_codes: bool,
    pub metadata: HashMap<String, String>,
    pub subscription_metadata: HashMap<String, String>,
}

/// Billing provider client trait
///
/// Implement this per provider. Lookups of missing objects fail with a
/// provider error classified as not-found.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Customers whose email matches exactly, in provider order
    async fn search_customers_by_email(&self, email: &str) -> Result<Vec<BillingCustomer>>;

    async fn create_customer(&self, customer: NewCustomer) -> Result<BillingCustomer>;

    /// Prices whose metadata matches the query, in provider order
    async fn search_prices(&self, query: &PriceQuery) -> Result<Vec<BillingPrice>>;

    async fn create_price(&self, price: NewPrice) -> Result<BillingPrice>;

    /// Subscriptions of a customer in any status, newest first, at most `limit`
    async fn list_subscriptions(
        &self,
        customer_id: &str,
        limit: u8,
    ) -> Result<Vec<BillingSubscription>>;

    /// Subscription with its default payment method and product expanded
    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<BillingSubscription>;

    async fn create_subscription(
        &self,
        subscription: NewSubscription,
    ) -> Result<BillingSubscription>;

    /// Schedule cancellation at the end of the current period
    async fn cancel_at_period_end(&self, subscription_id: &str) -> Result<BillingSubscription>;

    /// Cancel right away
    async fn cancel_subscription(&self, subscription_id: &str) -> Result<BillingSubscription>;

    async fn set_default_payment_method(
        &self,
        subscription_id: &str,
        payment_method_id: &str,
    ) -> Result<BillingSubscription>;

    async fn retrieve_payment_method(&self, payment_method_id: &str) -> Result<PaymentMethod>;

    async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> Result<PaymentMethod>;

    /// Card payment methods attached to a customer
    async fn list_card_payment_methods(&self, customer_id: &str) -> Result<Vec<PaymentMethod>>;

    async fn retrieve_setup_intent(&self, setup_intent_id: &str) -> Result<SetupIntent>;

    /// Display name of a provider-side product
    async fn product_name(&self, product_id: &str) -> Result<String>;

    async fn create_checkout_session(&self, session: NewCheckoutSession) -> Result<CheckoutSession>;

    /// Provider name
    fn name(&self) -> &str;
}
