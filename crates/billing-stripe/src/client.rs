//! Live Stripe provider
//!
//! Implements [`BillingProvider`] against the Stripe API. Every SDK failure
//! goes through [`map_stripe_error`] so the provider's code and message
//! survive into [`ProviderError`].

use std::collections::HashMap;

use async_trait::async_trait;
use billing_core::provider::{
    NewCheckoutSession, NewCustomer, NewPrice, NewSubscription, PriceQuery, ops,
};
use billing_core::{
    BillingCustomer, BillingError, BillingInterval, BillingPrice, BillingProvider,
    BillingSubscription, CheckoutSession, LOCAL_USER_ID_KEY, PaymentMethod, ProviderError, Result,
    SetupIntent,
};
use serde::{Deserialize, Serialize};
use stripe::{
    AttachPaymentMethod, CancelSubscription, CheckoutSessionMode, Client, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CreateCheckoutSessionSubscriptionData, CreateCustomer,
    CreatePrice, CreatePriceProductData, CreatePriceRecurring, CreatePriceRecurringInterval,
    CreateSubscription, CreateSubscriptionItems, Currency, ListPaymentMethods, ListSubscriptions,
    PaymentMethodTypeFilter, SubscriptionStatusFilter, UpdateSubscription,
};

use crate::config::StripeConfig;
use crate::convert;

const SUBSCRIPTION_EXPAND: &[&str] = &["default_payment_method", "items.data.price.product"];
const SEARCH_LIMIT: u64 = 100;

/// Stripe-backed billing provider
pub struct StripeBillingProvider {
    client: Client,
}

impl StripeBillingProvider {
    pub fn new(config: &StripeConfig) -> Self {
        Self { client: Client::new(config.secret_key()) }
    }

    /// Build from `STRIPE_SECRET_KEY`
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(&StripeConfig::from_env()?))
    }

    /// Get the underlying Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    async fn search<T>(&self, path: &str, query: String, operation: &str) -> Result<Vec<T>>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        let params = SearchParams {
            query,
            limit: SEARCH_LIMIT,
        };
        let page: SearchPage<T> = self
            .client
            .get_query(path, params)
            .await
            .map_err(|e| map_stripe_error(e, operation))?;
        Ok(page.data)
    }
}

#[derive(Serialize)]
struct SearchParams {
    query: String,
    limit: u64,
}

#[derive(Deserialize)]
struct SearchPage<T> {
    data: Vec<T>,
}

// ============================================================================
// Error and ID helpers
// ============================================================================

fn map_stripe_error(error: stripe::StripeError, operation: &str) -> BillingError {
    let err = match error {
        stripe::StripeError::Stripe(request_error) => {
            let message = request_error
                .message
                .clone()
                .unwrap_or_else(|| "Unknown error".to_string());
            let mut err =
                ProviderError::new(operation, message).with_status(request_error.http_status);
            if let Some(code) = request_error.code.as_ref() {
                err = err.with_code(convert::snake_case(&format!("{code:?}")));
            }
            err
        }
        stripe::StripeError::Timeout => {
            ProviderError::new(operation, "Request timed out").with_status(408)
        }
        stripe::StripeError::ClientError(msg) => {
            ProviderError::new(operation, format!("HTTP client error: {msg}"))
        }
        other => ProviderError::new(operation, other.to_string()),
    };
    tracing::warn!(
        operation,
        code = ?err.code,
        http_status = ?err.http_status,
        message = %err.message,
        "Stripe request failed"
    );
    err.into()
}

fn parse_id<T: std::str::FromStr>(id: &str, kind: &str) -> Result<T> {
    id.parse::<T>().map_err(|_| BillingError::invalid(format!("Invalid {kind} ID: {id}")))
}

fn parse_currency(currency: &str) -> Result<Currency> {
    serde_json::from_value::<Currency>(serde_json::Value::String(currency.to_lowercase()))
        .map_err(|_| BillingError::invalid(format!("Unsupported currency: {currency}")))
}

/// Quote a value for the search query language
fn quoted(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn price_search_query(query: &PriceQuery) -> String {
    format!(
        "metadata['product_sku']:{} AND metadata['billing_period']:{} AND currency:{}",
        quoted(&query.product_sku),
        quoted(query.interval.as_str()),
        quoted(&query.currency.to_lowercase()),
    )
}

fn recurring_interval(interval: BillingInterval) -> CreatePriceRecurringInterval {
    match interval {
        BillingInterval::Month => CreatePriceRecurringInterval::Month,
        BillingInterval::Year => CreatePriceRecurringInterval::Year,
    }
}

// ============================================================================
// BillingProvider Implementation
// ============================================================================

#[async_trait]
impl BillingProvider for StripeBillingProvider {
    async fn search_customers_by_email(&self, email: &str) -> Result<Vec<BillingCustomer>> {
        let customers: Vec<stripe::Customer> = self
            .search("/customers/search", format!("email:{}", quoted(email)), ops::SEARCH_CUSTOMERS)
            .await?;
        Ok(customers.into_iter().map(convert::customer).collect())
    }

    async fn create_customer(&self, customer: NewCustomer) -> Result<BillingCustomer> {
        let mut params = CreateCustomer::new();
        params.email = Some(&customer.email);
        params.metadata = Some(HashMap::from([(
            LOCAL_USER_ID_KEY.to_string(),
            customer.local_user_id.to_string(),
        )]));

        let created = stripe::Customer::create(&self.client, params)
            .await
            .map_err(|e| map_stripe_error(e, ops::CREATE_CUSTOMER))?;
        tracing::info!(
            customer_id = %created.id,
            user_id = customer.local_user_id,
            "Created Stripe customer"
        );
        Ok(convert::customer(created))
    }

    async fn search_prices(&self, query: &PriceQuery) -> Result<Vec<BillingPrice>> {
        let prices: Vec<stripe::Price> = self
            .search("/prices/search", price_search_query(query), ops::SEARCH_PRICES)
            .await?;
        Ok(prices.into_iter().map(convert::price).collect())
    }

    async fn create_price(&self, price: NewPrice) -> Result<BillingPrice> {
        let mut params = CreatePrice::new(parse_currency(&price.currency)?);
        params.unit_amount = Some(price.unit_amount);
        params.recurring = Some(CreatePriceRecurring {
            interval: recurring_interval(price.interval),
            interval_count: None,
            aggregate_usage: None,
            trial_period_days: None,
            usage_type: None,
        });
        params.product_data = Some(CreatePriceProductData {
            name: price.product_name.clone(),
            metadata: Some(price.product_metadata),
            ..Default::default()
        });
        params.metadata = Some(price.metadata);

        let created = stripe::Price::create(&self.client, params)
            .await
            .map_err(|e| map_stripe_error(e, ops::CREATE_PRICE))?;
        tracing::info!(
            price_id = %created.id,
            product = %price.product_name,
            unit_amount = price.unit_amount,
            interval = %price.interval,
            "Created Stripe price"
        );
        Ok(convert::price(created))
    }

    async fn list_subscriptions(
        &self,
        customer_id: &str,
        limit: u8,
    ) -> Result<Vec<BillingSubscription>> {
        let mut params = ListSubscriptions::new();
        params.customer = Some(parse_id(customer_id, "customer")?);
        params.limit = Some(u64::from(limit));
        params.status = Some(SubscriptionStatusFilter::All);
        params.expand = &["data.default_payment_method"];

        let list = stripe::Subscription::list(&self.client, &params)
            .await
            .map_err(|e| map_stripe_error(e, ops::LIST_SUBSCRIPTIONS))?;
        Ok(list.data.into_iter().map(convert::subscription).collect())
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<BillingSubscription> {
        let id = parse_id::<stripe::SubscriptionId>(subscription_id, "subscription")?;
        let subscription = stripe::Subscription::retrieve(&self.client, &id, SUBSCRIPTION_EXPAND)
            .await
            .map_err(|e| map_stripe_error(e, ops::RETRIEVE_SUBSCRIPTION))?;
        Ok(convert::subscription(subscription))
    }

    async fn create_subscription(
        &self,
        subscription: NewSubscription,
    ) -> Result<BillingSubscription> {
        let mut params = CreateSubscription::new(parse_id(&subscription.customer_id, "customer")?);
        params.items = Some(vec![CreateSubscriptionItems {
            price: Some(subscription.price_id.clone()),
            ..Default::default()
        }]);
        params.default_payment_method = Some(&subscription.default_payment_method);
        params.metadata = Some(subscription.metadata.clone());
        params.expand = SUBSCRIPTION_EXPAND;

        let created = stripe::Subscription::create(&self.client, params)
            .await
            .map_err(|e| map_stripe_error(e, ops::CREATE_SUBSCRIPTION))?;
        tracing::info!(
            subscription_id = %created.id,
            customer_id = %subscription.customer_id,
            price_id = %subscription.price_id,
            "Created Stripe subscription"
        );
        Ok(convert::subscription(created))
    }

    async fn cancel_at_period_end(&self, subscription_id: &str) -> Result<BillingSubscription> {
        let id = parse_id::<stripe::SubscriptionId>(subscription_id, "subscription")?;
        let mut params = UpdateSubscription::new();
        params.cancel_at_period_end = Some(true);

        let updated = stripe::Subscription::update(&self.client, &id, params)
            .await
            .map_err(|e| map_stripe_error(e, ops::UPDATE_SUBSCRIPTION))?;
        Ok(convert::subscription(updated))
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<BillingSubscription> {
        let id = parse_id::<stripe::SubscriptionId>(subscription_id, "subscription")?;
        let canceled = stripe::Subscription::cancel(&self.client, &id, CancelSubscription::new())
            .await
            .map_err(|e| map_stripe_error(e, ops::CANCEL_SUBSCRIPTION))?;
        Ok(convert::subscription(canceled))
    }

    async fn set_default_payment_method(
        &self,
        subscription_id: &str,
        payment_method_id: &str,
    ) -> Result<BillingSubscription> {
        let id = parse_id::<stripe::SubscriptionId>(subscription_id, "subscription")?;
        let mut params = UpdateSubscription::new();
        params.default_payment_method = Some(payment_method_id);

        let updated = stripe::Subscription::update(&self.client, &id, params)
            .await
            .map_err(|e| map_stripe_error(e, ops::UPDATE_SUBSCRIPTION))?;
        Ok(convert::subscription(updated))
    }

    async fn retrieve_payment_method(&self, payment_method_id: &str) -> Result<PaymentMethod> {
        let id = parse_id::<stripe::PaymentMethodId>(payment_method_id, "payment method")?;
        let pm = stripe::PaymentMethod::retrieve(&self.client, &id, &[])
            .await
            .map_err(|e| map_stripe_error(e, ops::RETRIEVE_PAYMENT_METHOD))?;
        Ok(convert::payment_method(pm))
    }

    async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> Result<PaymentMethod> {
        let id = parse_id::<stripe::PaymentMethodId>(payment_method_id, "payment method")?;
        let params = AttachPaymentMethod {
            customer: parse_id(customer_id, "customer")?,
        };
        let pm = stripe::PaymentMethod::attach(&self.client, &id, params)
            .await
            .map_err(|e| map_stripe_error(e, ops::ATTACH_PAYMENT_METHOD))?;
        Ok(convert::payment_method(pm))
    }

    async fn list_card_payment_methods(&self, customer_id: &str) -> Result<Vec<PaymentMethod>> {
        let mut params = ListPaymentMethods::new();
        params.customer = Some(parse_id(customer_id, "customer")?);
        params.type_ = Some(PaymentMethodTypeFilter::Card);

        let list = stripe::PaymentMethod::list(&self.client, &params)
            .await
            .map_err(|e| map_stripe_error(e, ops::LIST_PAYMENT_METHODS))?;
        Ok(list.data.into_iter().map(convert::payment_method).collect())
    }

    async fn retrieve_setup_intent(&self, setup_intent_id: &str) -> Result<SetupIntent> {
        let id = parse_id::<stripe::SetupIntentId>(setup_intent_id, "setup intent")?;
        let intent = stripe::SetupIntent::retrieve(&self.client, &id, &[])
            .await
            .map_err(|e| map_stripe_error(e, ops::RETRIEVE_SETUP_INTENT))?;
        Ok(convert::setup_intent(intent))
    }

    async fn product_name(&self, product_id: &str) -> Result<String> {
        let id = parse_id::<stripe::ProductId>(product_id, "product")?;
        let product = stripe::Product::retrieve(&self.client, &id, &[])
            .await
            .map_err(|e| map_stripe_error(e, ops::RETRIEVE_PRODUCT))?;
        product.name.ok_or_else(|| {
            ProviderError::new(
                ops::RETRIEVE_PRODUCT,
                format!("Product {product_id} has no name"),
            )
            .into()
        })
    }

    async fn create_checkout_session(
        &self,
        session: NewCheckoutSession,
    ) -> Result<CheckoutSession> {
        let mut params = CreateCheckoutSession::new();
        params.customer = Some(parse_id(&session.customer_id, "customer")?);
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.success_url = Some(&session.success_url);
        params.cancel_url = Some(&session.cancel_url);
        params.allow_promotion_codes = Some(session.allow_promotion_codes);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(session.price_id.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.subscription_data = Some(CreateCheckoutSessionSubscriptionData {
            metadata: Some(session.subscription_metadata.clone()),
            ..Default::default()
        });
        params.metadata = Some(session.metadata.clone());

        let created = stripe::CheckoutSession::create(&self.client, params)
            .await
            .map_err(|e| map_stripe_error(e, ops::CREATE_CHECKOUT_SESSION))?;
        let url = created.url.ok_or_else(|| {
            ProviderError::new(ops::CREATE_CHECKOUT_SESSION, "No checkout URL returned")
        })?;

        tracing::info!(
            session_id = %created.id,
            customer_id = %session.customer_id,
            price_id = %session.price_id,
            "Created checkout session"
        );
        Ok(CheckoutSession {
            id: created.id.to_string(),
            url,
        })
    }

    fn name(&self) -> &str {
        "stripe"
    }
}
