//! Subscription Service
//!
//! The operations behind the storefront's billing API. Every operation but
//! the plan listing needs a signed-in user.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::config::BillingConfig;
use crate::customer::CustomerResolver;
use crate::error::{BillingError, Result};
use crate::format::{PaymentMethodView, SubscriptionFormatter, SubscriptionView};
use crate::identity::IdentityProvider;
use crate::mapping::MappingStore;
use crate::model::{BillingInterval, BillingSubscription, LOCAL_USER_ID_KEY, LocalUser, Product};
use crate::payment_method::{ensure_attached, verify_setup_intent};
use crate::plans::{PlanTier, SubscriptionPlan, list_subscription_plans};
use crate::price::PriceResolver;
use crate::provider::{BillingProvider, NewCheckoutSession, NewSubscription};
use crate::selector::select_subscription;

/// A hosted checkout the storefront should redirect to
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckoutResult {
    pub checkout_url: String,
    pub session_id: String,
    pub price_id: String,
    /// Major units
    pub amount: Decimal,
    /// Upper-case ISO currency
    pub currency: String,
    pub product_id: String,
    pub billing_period: String,
}

/// Input of [`SubscriptionService::create_subscription`]
#[derive(Clone, Debug)]
pub struct SubscriptionRequest {
    pub product_id: String,
    pub payment_method_id: String,
    pub billing_period: String,
    pub setup_intent_id: Option<String>,
}

/// Input of [`SubscriptionService::upgrade_subscription`]
#[derive(Clone, Debug)]
pub struct UpgradeRequest {
    pub subscription_id: String,
    pub product_id: String,
    pub billing_period: String,
}

/// Subscription reconciliation service
pub struct SubscriptionService {
    config: BillingConfig,
    provider: Arc<dyn BillingProvider>,
    catalog: Arc<dyn Catalog>,
    customers: CustomerResolver,
    prices: PriceResolver,
}

impl SubscriptionService {
    pub fn new(
        config: BillingConfig,
        provider: Arc<dyn BillingProvider>,
        catalog: Arc<dyn Catalog>,
        mappings: Arc<dyn MappingStore>,
    ) -> Self {
        let customers =
            CustomerResolver::new(provider.clone(), mappings, config.subscription_page_size);
        let prices = PriceResolver::new(provider.clone());
        Self {
            config,
            provider,
            catalog,
            customers,
            prices,
        }
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    pub fn customers(&self) -> &CustomerResolver {
        &self.customers
    }

    pub fn prices(&self) -> &PriceResolver {
        &self.prices
    }

    fn formatter(&self) -> SubscriptionFormatter<'_> {
        SubscriptionFormatter::new(self.provider.as_ref(), &self.config.currency)
    }

    /// Start a hosted checkout for a new subscription
    pub async fn create_payment_intent(
        &self,
        identity: &dyn IdentityProvider,
        order_number: &str,
        product_id: &str,
        billing_period: &str,
    ) -> Result<CheckoutResult> {
        let user = identity.current_user().await?;
        let interval: BillingInterval = billing_period.parse()?;
        let product = self.catalog.get_product(product_id).await?;
        let customer_id = self.customers.ensure_billing_customer(&user).await?;
        let price_id = self
            .prices
            .resolve_price_id(&product, interval, &self.config.currency)
            .await?;

        let session = self
            .provider
            .create_checkout_session(NewCheckoutSession {
                customer_id: customer_id.clone(),
                price_id: price_id.clone(),
                success_url: self.config.dashboard_url("success"),
                cancel_url: self.config.dashboard_url("cancelled"),
                allow_promotion_codes: true,
                metadata: metadata([
                    ("order_number", order_number.to_string()),
                    (LOCAL_USER_ID_KEY, user.user_id.to_string()),
                    ("billing_customer_id", customer_id.clone()),
                    ("product_id", product.id.clone()),
                    ("billing_period", interval.period_label().to_string()),
                ]),
                subscription_metadata: metadata([
                    ("order_number", order_number.to_string()),
                    (LOCAL_USER_ID_KEY, user.user_id.to_string()),
                    ("product_id", product.id.clone()),
                ]),
            })
            .await?;

        tracing::info!(
            user_id = user.user_id,
            customer_id = %customer_id,
            session_id = %session.id,
            order_number,
            "Checkout session created"
        );
        Ok(self.checkout_result(session.url, session.id, price_id, &product, interval))
    }

    /// Subscribe directly with a confirmed payment method
    pub async fn create_subscription(
        &self,
        identity: &dyn IdentityProvider,
        request: SubscriptionRequest,
    ) -> Result<SubscriptionView> {
        let user = identity.current_user().await?;
        let interval: BillingInterval = request.billing_period.parse()?;
        let product = self.catalog.get_product(&request.product_id).await?;
        let customer_id = self.customers.ensure_billing_customer(&user).await?;

        if let Some(setup_intent_id) = request
            .setup_intent_id
            .as_deref()
            .filter(|id| !id.is_empty())
        {
            verify_setup_intent(
                self.provider.as_ref(),
                setup_intent_id,
                &customer_id,
                &request.payment_method_id,
            )
            .await?;
        }
        ensure_attached(self.provider.as_ref(), &request.payment_method_id, &customer_id).await?;

        let price_id = self
            .prices
            .resolve_price_id(&product, interval, &self.config.currency)
            .await?;
        let subscription = self
            .provider
            .create_subscription(NewSubscription {
                customer_id: customer_id.clone(),
                price_id,
                default_payment_method: request.payment_method_id,
                metadata: metadata([
                    (LOCAL_USER_ID_KEY, user.user_id.to_string()),
                    ("product_id", product.id.clone()),
                ]),
            })
            .await?;

        tracing::info!(
            user_id = user.user_id,
            customer_id = %customer_id,
            subscription_id = %subscription.id,
            status = %subscription.status,
            "Subscription created"
        );
        Ok(self.formatter().format(&subscription).await)
    }

    /// Cancel at period end (default) or immediately
    pub async fn cancel_subscription(
        &self,
        identity: &dyn IdentityProvider,
        subscription_id: &str,
        cancel_at_period_end: bool,
    ) -> Result<bool> {
        let user = identity.current_user().await?;
        self.owned_subscription(&user, subscription_id).await?;

        let updated = if cancel_at_period_end {
            self.provider.cancel_at_period_end(subscription_id).await?
        } else {
            self.provider.cancel_subscription(subscription_id).await?
        };

        tracing::info!(
            user_id = user.user_id,
            subscription_id,
            at_period_end = cancel_at_period_end,
            status = %updated.status,
            "Subscription cancelled"
        );
        Ok(true)
    }

    /// Point a subscription at another payment method
    pub async fn change_payment_method(
        &self,
        identity: &dyn IdentityProvider,
        subscription_id: &str,
        payment_method_id: &str,
    ) -> Result<SubscriptionView> {
        let user = identity.current_user().await?;
        let (customer_id, _) = self.owned_subscription(&user, subscription_id).await?;

        // Usually already attached by the setup flow.
        if let Err(e) = self.provider.attach_payment_method(payment_method_id, &customer_id).await {
            tracing::info!(payment_method_id, error = %e, "Payment method attach skipped");
        }

        self.provider.set_default_payment_method(subscription_id, payment_method_id).await?;
        let subscription = self.provider.retrieve_subscription(subscription_id).await?;

        tracing::info!(
            user_id = user.user_id,
            subscription_id,
            payment_method_id,
            "Payment method changed"
        );
        Ok(self.formatter().format(&subscription).await)
    }

    /// Start a hosted checkout that moves a subscription to a pro plan
    pub async fn upgrade_subscription(
        &self,
        identity: &dyn IdentityProvider,
        request: UpgradeRequest,
    ) -> Result<CheckoutResult> {
        let user = identity.current_user().await?;
        let interval: BillingInterval = request.billing_period.parse()?;
        let product = self.catalog.get_product(&request.product_id).await?;
        if PlanTier::from_name(&product.name) != PlanTier::Pro {
            return Err(BillingError::invalid("Product must be a Pro plan for upgrade"));
        }

        let (customer_id, _) = self.owned_subscription(&user, &request.subscription_id).await?;
        let price_id = self
            .prices
            .resolve_price_id(&product, interval, &self.config.currency)
            .await?;

        let session = self
            .provider
            .create_checkout_session(NewCheckoutSession {
                customer_id: customer_id.clone(),
                price_id: price_id.clone(),
                success_url: self.config.dashboard_url("upgrade_success"),
                cancel_url: self.config.dashboard_url("upgrade_cancelled"),
                allow_promotion_codes: false,
                metadata: metadata([
                    (LOCAL_USER_ID_KEY, user.user_id.to_string()),
                    ("subscription_id", request.subscription_id.clone()),
                    ("product_id", product.id.clone()),
                    ("type", "upgrade".to_string()),
                ]),
                subscription_metadata: metadata([
                    (LOCAL_USER_ID_KEY, user.user_id.to_string()),
                    ("product_id", product.id.clone()),
                    ("type", "upgrade".to_string()),
                    ("previous_subscription_id", request.subscription_id.clone()),
                ]),
            })
            .await?;

        tracing::info!(
            user_id = user.user_id,
            subscription_id = %request.subscription_id,
            session_id = %session.id,
            "Upgrade checkout created"
        );
        Ok(self.checkout_result(session.url, session.id, price_id, &product, interval))
    }

    /// The user's current subscription, if any
    pub async fn get_customer_subscription(
        &self,
        identity: &dyn IdentityProvider,
    ) -> Result<Option<SubscriptionView>> {
        let user = identity.current_user().await?;
        match self.current_subscription(&user).await {
            Ok(subscription) => Ok(Some(self.formatter().format(&subscription).await)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Cards saved on the user's billing customer
    pub async fn get_saved_payment_methods(
        &self,
        identity: &dyn IdentityProvider,
    ) -> Result<Vec<PaymentMethodView>> {
        let user = identity.current_user().await?;
        let customer_id = match self.customers.resolve_billing_customer(&user).await {
            Ok(id) => id,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let methods = self.provider.list_card_payment_methods(&customer_id).await?;
        Ok(methods.iter().map(PaymentMethodView::from).collect())
    }

    /// Public plan listing
    pub async fn get_subscription_plans(&self) -> Result<Vec<SubscriptionPlan>> {
        list_subscription_plans(self.catalog.as_ref(), &self.config).await
    }

    async fn current_subscription(&self, user: &LocalUser) -> Result<BillingSubscription> {
        let resolved = self.customers.resolve(user).await?;
        if let Some(subscription) = resolved.subscription {
            return Ok(subscription);
        }

        let subscriptions = self
            .provider
            .list_subscriptions(&resolved.customer_id, self.config.subscription_page_size)
            .await?;
        let selection = select_subscription(&subscriptions, user.user_id)?;
        tracing::debug!(
            user_id = user.user_id,
            subscription_id = %selection.subscription.id,
            rule = selection.rule.rank(),
            "Selected subscription"
        );
        Ok(selection.subscription.clone())
    }

    /// The subscription, after checking it belongs to the user's customer
    /// (or names the user in its metadata)
    async fn owned_subscription(
        &self,
        user: &LocalUser,
        subscription_id: &str,
    ) -> Result<(String, BillingSubscription)> {
        let customer_id = self
            .customers
            .resolve_billing_customer(user)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    BillingError::not_found("Billing account")
                } else {
                    e
                }
            })?;

        let subscription = self
            .provider
            .retrieve_subscription(subscription_id)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    BillingError::not_found("Subscription")
                } else {
                    e
                }
            })?;

        if subscription.customer_id != customer_id && !subscription.belongs_to(user.user_id) {
            tracing::warn!(
                user_id = user.user_id,
                subscription_id,
                customer_id = %customer_id,
                owner = %subscription.customer_id,
                "Subscription belongs to another customer"
            );
            return Err(BillingError::OwnershipMismatch(format!(
                "subscription {subscription_id} does not belong to this account"
            )));
        }
        Ok((customer_id, subscription))
    }

    fn checkout_result(
        &self,
        url: String,
        session_id: String,
        price_id: String,
        product: &Product,
        interval: BillingInterval,
    ) -> CheckoutResult {
        CheckoutResult {
            checkout_url: url,
            session_id,
            price_id,
            amount: product.price,
            currency: self.config.currency.to_uppercase(),
            product_id: product.id.clone(),
            billing_period: interval.period_label().to_string(),
        }
    }
}

fn metadata<const N: usize>(pairs: [(&str, String); N]) -> HashMap<String, String> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}
