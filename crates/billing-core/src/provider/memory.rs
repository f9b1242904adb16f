//! In-Memory Billing Provider
//!
//! For testing and local development. Behaves like a real provider for the
//! calls the service makes, counts every call, and can be told to fail a
//! given operation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{
    BillingProvider, NewCheckoutSession, NewCustomer, NewPrice, NewSubscription, PriceQuery, ops,
};
use crate::error::{ProviderError, Result};
use crate::model::{
    BillingCustomer, BillingInterval, BillingPrice, BillingSubscription, CheckoutSession,
    PaymentMethod, PaymentMethodRef, ProductRef, SetupIntent, SubscriptionStatus,
};

#[derive(Default)]
struct State {
    customers: Vec<BillingCustomer>,
    prices: Vec<BillingPrice>,
    subscriptions: Vec<BillingSubscription>,
    payment_methods: HashMap<String, PaymentMethod>,
    setup_intents: HashMap<String, SetupIntent>,
    products: HashMap<String, String>,
    checkout_sessions: Vec<NewCheckoutSession>,
}

/// In-memory billing provider with call counters
#[derive(Default)]
pub struct MemoryBillingProvider {
    state: RwLock<State>,
    calls: Mutex<HashMap<&'static str, usize>>,
    failures: Mutex<HashMap<&'static str, ProviderError>>,
}

impl MemoryBillingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls made to `operation` (see [`ops`])
    pub fn calls(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(operation).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Make every later call to `operation` fail with `error`
    pub fn fail_on(&self, operation: &'static str, error: ProviderError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(operation, error);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.clear();
        }
    }

    /// Register a customer; returns its id
    pub fn add_customer(&self, email: &str) -> String {
        let id = generate_id("cus");
        if let Ok(mut state) = self.state.write() {
            state.customers.push(BillingCustomer {
                id: id.clone(),
                email: Some(email.to_string()),
            });
        }
        id
    }

    pub fn add_price(&self, price: BillingPrice) {
        if let Ok(mut state) = self.state.write() {
            state.prices.push(price);
        }
    }

    pub fn add_product(&self, product_id: &str, name: &str) {
        if let Ok(mut state) = self.state.write() {
            state.products.insert(product_id.to_string(), name.to_string());
        }
    }

    /// Subscriptions are listed in insertion order.
    pub fn add_subscription(&self, subscription: BillingSubscription) {
        if let Ok(mut state) = self.state.write() {
            state.subscriptions.push(subscription);
        }
    }

    pub fn add_payment_method(&self, payment_method: PaymentMethod) {
        if let Ok(mut state) = self.state.write() {
            state.payment_methods.insert(payment_method.id.clone(), payment_method);
        }
    }

    pub fn add_setup_intent(&self, setup_intent: SetupIntent) {
        if let Ok(mut state) = self.state.write() {
            state.setup_intents.insert(setup_intent.id.clone(), setup_intent);
        }
    }

    /// Snapshot of a stored subscription
    pub fn subscription(&self, subscription_id: &str) -> Option<BillingSubscription> {
        let state = self.state.read().ok()?;
        state.subscriptions.iter().find(|s| s.id == subscription_id).cloned()
    }

    pub fn payment_method(&self, payment_method_id: &str) -> Option<PaymentMethod> {
        let state = self.state.read().ok()?;
        state.payment_methods.get(payment_method_id).cloned()
    }

    pub fn customers(&self) -> Vec<BillingCustomer> {
        self.state.read().map(|state| state.customers.clone()).unwrap_or_default()
    }

    pub fn prices(&self) -> Vec<BillingPrice> {
        self.state.read().map(|state| state.prices.clone()).unwrap_or_default()
    }

    /// Checkout sessions requested so far
    pub fn checkout_sessions(&self) -> Vec<NewCheckoutSession> {
        self.state.read().map(|state| state.checkout_sessions.clone()).unwrap_or_default()
    }

    fn enter(&self, operation: &'static str) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(operation).or_insert(0) += 1;
        }
        let injected = self
            .failures
            .lock()
            .ok()
            .and_then(|failures| failures.get(operation).cloned());
        match injected {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    fn read(&self, operation: &str) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| ProviderError::new(operation, "provider state lock poisoned").into())
    }

    fn write(&self, operation: &str) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| ProviderError::new(operation, "provider state lock poisoned").into())
    }

    fn update_subscription<F>(
        &self,
        operation: &'static str,
        subscription_id: &str,
        apply: F,
    ) -> Result<BillingSubscription>
    where
        F: FnOnce(&mut BillingSubscription),
    {
        let mut state = self.write(operation)?;
        let index = state
            .subscriptions
            .iter()
            .position(|s| s.id == subscription_id)
            .ok_or_else(|| missing(operation, "subscription", subscription_id))?;
        let mut subscription = state.subscriptions[index].clone();
        apply(&mut subscription);
        state.subscriptions[index] = subscription.clone();
        Ok(subscription)
    }
}

fn generate_id(prefix: &str) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &hex[..14])
}

fn missing(operation: &str, kind: &str, id: &str) -> crate::error::BillingError {
    ProviderError::new(operation, format!("No such {kind}: '{id}'"))
        .with_code("resource_missing")
        .with_status(404)
        .into()
}

fn expand(subscription: &mut BillingSubscription, state: &State) {
    let expanded_pm = match &subscription.default_payment_method {
        Some(PaymentMethodRef::Id(id)) => state.payment_methods.get(id).cloned(),
        _ => None,
    };
    if let Some(pm) = expanded_pm {
        subscription.default_payment_method = Some(PaymentMethodRef::Expanded(pm));
    }

    for price in &mut subscription.items {
        let expanded_product = match &price.product {
            Some(ProductRef::Id(id)) => state.products.get(id).map(|name| ProductRef::Expanded {
                id: id.clone(),
                name: Some(name.clone()),
            }),
            _ => None,
        };
        if expanded_product.is_some() {
            price.product = expanded_product;
        }
    }
}

#[async_trait]
impl BillingProvider for MemoryBillingProvider {
    async fn search_customers_by_email(&self, email: &str) -> Result<Vec<BillingCustomer>> {
        self.enter(ops::SEARCH_CUSTOMERS)?;
        let state = self.read(ops::SEARCH_CUSTOMERS)?;
        Ok(state
            .customers
            .iter()
            .filter(|c| c.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
            .cloned()
            .collect())
    }

    async fn create_customer(&self, customer: NewCustomer) -> Result<BillingCustomer> {
        self.enter(ops::CREATE_CUSTOMER)?;
        let created = BillingCustomer {
            id: generate_id("cus"),
            email: Some(customer.email),
        };
        self.write(ops::CREATE_CUSTOMER)?.customers.push(created.clone());
        Ok(created)
    }

    async fn search_prices(&self, query: &PriceQuery) -> Result<Vec<BillingPrice>> {
        self.enter(ops::SEARCH_PRICES)?;
        let state = self.read(ops::SEARCH_PRICES)?;
        // Metadata only: currency narrowing is left to the caller.
        Ok(state
            .prices
            .iter()
            .filter(|p| {
                let period = p.metadata.get("billing_period").map(String::as_str);
                p.metadata.get("product_sku") == Some(&query.product_sku)
                    && period == Some(query.interval.as_str())
            })
            .cloned()
            .collect())
    }

    async fn create_price(&self, price: NewPrice) -> Result<BillingPrice> {
        self.enter(ops::CREATE_PRICE)?;
        let product_id = generate_id("prod");
        let created = BillingPrice {
            id: generate_id("price"),
            currency: price.currency.to_lowercase(),
            unit_amount: Some(price.unit_amount),
            nickname: None,
            product: Some(ProductRef::Id(product_id.clone())),
            interval: Some(price.interval),
            metadata: price.metadata,
        };
        let mut state = self.write(ops::CREATE_PRICE)?;
        state.products.insert(product_id, price.product_name);
        state.prices.push(created.clone());
        Ok(created)
    }

    async fn list_subscriptions(
        &self,
        customer_id: &str,
        limit: u8,
    ) -> Result<Vec<BillingSubscription>> {
        self.enter(ops::LIST_SUBSCRIPTIONS)?;
        let state = self.read(ops::LIST_SUBSCRIPTIONS)?;
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| s.customer_id == customer_id)
            .take(usize::from(limit))
            .cloned()
            .collect())
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<BillingSubscription> {
        self.enter(ops::RETRIEVE_SUBSCRIPTION)?;
        let state = self.read(ops::RETRIEVE_SUBSCRIPTION)?;
        let mut subscription = state
            .subscriptions
            .iter()
            .find(|s| s.id == subscription_id)
            .cloned()
            .ok_or_else(|| missing(ops::RETRIEVE_SUBSCRIPTION, "subscription", subscription_id))?;
        expand(&mut subscription, &state);
        Ok(subscription)
    }

    async fn create_subscription(
        &self,
        subscription: NewSubscription,
    ) -> Result<BillingSubscription> {
        self.enter(ops::CREATE_SUBSCRIPTION)?;
        let mut state = self.write(ops::CREATE_SUBSCRIPTION)?;
        let price = state
            .prices
            .iter()
            .find(|p| p.id == subscription.price_id)
            .cloned()
            .ok_or_else(|| missing(ops::CREATE_SUBSCRIPTION, "price", &subscription.price_id))?;

        let now = chrono::Utc::now();
        let period = match price.interval {
            Some(BillingInterval::Year) => chrono::Duration::days(365),
            _ => chrono::Duration::days(30),
        };
        let mut created = BillingSubscription::new(
            generate_id("sub"),
            subscription.customer_id,
            SubscriptionStatus::Active,
        )
        .with_price(price);
        created.metadata = subscription.metadata;
        created.current_period_start = now.timestamp();
        created.current_period_end = (now + period).timestamp();
        created.default_payment_method =
            Some(PaymentMethodRef::Id(subscription.default_payment_method));

        state.subscriptions.insert(0, created.clone());
        expand(&mut created, &state);
        Ok(created)
    }

    async fn cancel_at_period_end(&self, subscription_id: &str) -> Result<BillingSubscription> {
        self.enter(ops::UPDATE_SUBSCRIPTION)?;
        self.update_subscription(ops::UPDATE_SUBSCRIPTION, subscription_id, |sub| {
            sub.cancel_at_period_end = true;
        })
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<BillingSubscription> {
        self.enter(ops::CANCEL_SUBSCRIPTION)?;
        self.update_subscription(ops::CANCEL_SUBSCRIPTION, subscription_id, |sub| {
            sub.status = SubscriptionStatus::Canceled;
        })
    }

    async fn set_default_payment_method(
        &self,
        subscription_id: &str,
        payment_method_id: &str,
    ) -> Result<BillingSubscription> {
        self.enter(ops::UPDATE_SUBSCRIPTION)?;
        if !self.read(ops::UPDATE_SUBSCRIPTION)?.payment_methods.contains_key(payment_method_id) {
            return Err(missing(ops::UPDATE_SUBSCRIPTION, "payment_method", payment_method_id));
        }
        self.update_subscription(ops::UPDATE_SUBSCRIPTION, subscription_id, |sub| {
            sub.default_payment_method = Some(PaymentMethodRef::Id(payment_method_id.to_string()));
        })
    }

    async fn retrieve_payment_method(&self, payment_method_id: &str) -> Result<PaymentMethod> {
        self.enter(ops::RETRIEVE_PAYMENT_METHOD)?;
        self.read(ops::RETRIEVE_PAYMENT_METHOD)?
            .payment_methods
            .get(payment_method_id)
            .cloned()
            .ok_or_else(|| {
                missing(ops::RETRIEVE_PAYMENT_METHOD, "payment_method", payment_method_id)
            })
    }

    async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> Result<PaymentMethod> {
        self.enter(ops::ATTACH_PAYMENT_METHOD)?;
        let mut state = self.write(ops::ATTACH_PAYMENT_METHOD)?;
        let pm = state
            .payment_methods
            .get_mut(payment_method_id)
            .ok_or_else(|| {
                missing(ops::ATTACH_PAYMENT_METHOD, "payment_method", payment_method_id)
            })?;
        match pm.customer.as_deref() {
            Some(owner) if owner != customer_id => Err(ProviderError::new(
                ops::ATTACH_PAYMENT_METHOD,
                "The payment method you provided has already been attached to a customer.",
            )
            .with_status(400)
            .into()),
            _ => {
                pm.customer = Some(customer_id.to_string());
                Ok(pm.clone())
            }
        }
    }

    async fn list_card_payment_methods(&self, customer_id: &str) -> Result<Vec<PaymentMethod>> {
        self.enter(ops::LIST_PAYMENT_METHODS)?;
        let state = self.read(ops::LIST_PAYMENT_METHODS)?;
        let mut methods: Vec<PaymentMethod> = state
            .payment_methods
            .values()
            .filter(|pm| pm.kind == "card" && pm.customer.as_deref() == Some(customer_id))
            .cloned()
            .collect();
        methods.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(methods)
    }

    async fn retrieve_setup_intent(&self, setup_intent_id: &str) -> Result<SetupIntent> {
        self.enter(ops::RETRIEVE_SETUP_INTENT)?;
        self.read(ops::RETRIEVE_SETUP_INTENT)?
            .setup_intents
            .get(setup_intent_id)
            .cloned()
            .ok_or_else(|| missing(ops::RETRIEVE_SETUP_INTENT, "setup_intent", setup_intent_id))
    }

    async fn product_name(&self, product_id: &str) -> Result<String> {
        self.enter(ops::RETRIEVE_PRODUCT)?;
        self.read(ops::RETRIEVE_PRODUCT)?
            .products
            .get(product_id)
            .cloned()
            .ok_or_else(|| missing(ops::RETRIEVE_PRODUCT, "product", product_id))
    }

    async fn create_checkout_session(
        &self,
        session: NewCheckoutSession,
    ) -> Result<CheckoutSession> {
        self.enter(ops::CREATE_CHECKOUT_SESSION)?;
        let id = generate_id("cs_test");
        let created = CheckoutSession {
            url: format!("https://checkout.example.test/c/pay/{id}"),
            id,
        };
        self.write(ops::CREATE_CHECKOUT_SESSION)?.checkout_sessions.push(session);
        Ok(created)
    }

    fn name(&self) -> &str {
        "MemoryBilling"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProviderErrorKind, classify_provider_error};

    #[tokio::test]
    async fn test_counts_calls_and_searches_by_email() {
        let provider = MemoryBillingProvider::new();
        let id = provider.add_customer("ana@example.com");
        provider.add_customer("other@example.com");

        let found = provider.search_customers_by_email("ana@example.com").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
        assert_eq!(provider.calls(ops::SEARCH_CUSTOMERS), 1);
        assert_eq!(provider.calls(ops::CREATE_CUSTOMER), 0);
    }

    #[tokio::test]
    async fn test_missing_objects_classify_as_not_found() {
        let provider = MemoryBillingProvider::new();
        let err = provider.retrieve_subscription("sub_missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let provider = MemoryBillingProvider::new();
        provider.fail_on(
            ops::SEARCH_PRICES,
            ProviderError::new(ops::SEARCH_PRICES, "search unavailable"),
        );

        let query = PriceQuery {
            product_sku: "pro_plan".into(),
            interval: BillingInterval::Month,
            currency: "brl".into(),
        };
        assert!(provider.search_prices(&query).await.is_err());

        provider.clear_failures();
        assert!(provider.search_prices(&query).await.unwrap().is_empty());
        assert_eq!(provider.calls(ops::SEARCH_PRICES), 2);
    }

    #[tokio::test]
    async fn test_attach_to_other_customer_is_refused() {
        let provider = MemoryBillingProvider::new();
        provider.add_payment_method(PaymentMethod {
            id: "pm_1".into(),
            kind: "card".into(),
            customer: Some("cus_other".into()),
            card: None,
        });

        let err = provider.attach_payment_method("pm_1", "cus_me").await.unwrap_err();
        match err {
            crate::error::BillingError::Provider(provider_err) => {
                assert_eq!(
                    classify_provider_error(&provider_err),
                    ProviderErrorKind::AlreadyAttached
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_modes() {
        let provider = MemoryBillingProvider::new();
        provider.add_subscription(
            BillingSubscription::new("sub_1", "cus_1", SubscriptionStatus::Active)
                .with_local_user(7),
        );

        let scheduled = provider.cancel_at_period_end("sub_1").await.unwrap();
        assert!(scheduled.cancel_at_period_end);
        assert_eq!(scheduled.status, SubscriptionStatus::Active);

        let canceled = provider.cancel_subscription("sub_1").await.unwrap();
        assert_eq!(canceled.status, SubscriptionStatus::Canceled);
    }
}
