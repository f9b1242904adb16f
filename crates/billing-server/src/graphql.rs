//! GraphQL gateway
//!
//! Three queries and five mutations, each a thin call into
//! [`SubscriptionService`]. Errors carry the user-facing message plus a
//! stable `code` extension (`NOT_FOUND`, `PAYMENT_METHOD_REJECTED`, ...).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_graphql::{
    Context, EmptySubscription, ErrorExtensions, InputObject, Object, Schema, SimpleObject,
};
use billing_core::provider::ops;
use billing_core::{
    BillingConfig, BillingError, Catalog, CheckoutResult, IdentityProvider, PaymentMethodView,
    ProviderError, SubscriptionPlan, SubscriptionRequest, SubscriptionService, SubscriptionView,
    UpgradeRequest,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::identity::ForwardedIdentity;

pub type BillingSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

/// Collaborators shared by every resolver
pub struct Gateway {
    /// `None` when no billing provider is configured
    pub service: Option<Arc<SubscriptionService>>,
    pub catalog: Arc<dyn Catalog>,
    pub billing: BillingConfig,
    pub timeout: Duration,
}

impl Gateway {
    /// Service for a signed-in caller; anonymous callers are refused
    /// before the provider configuration is looked at
    async fn authorized(
        &self,
        identity: &ForwardedIdentity,
    ) -> async_graphql::Result<&SubscriptionService> {
        identity.current_user().await.map_err(to_graphql_error)?;
        self.service.as_deref().ok_or_else(|| {
            to_graphql_error(BillingError::ConfigurationMissing("billing provider".into()))
        })
    }

    /// Run one operation under the request timeout
    async fn run<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = billing_core::Result<T>>,
    ) -> async_graphql::Result<T> {
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    operation,
                    timeout_secs = self.timeout.as_secs(),
                    "Operation timed out"
                );
                Err(ProviderError::new(operation, "Request timed out")
                    .with_status(408)
                    .into())
            }
        };
        result.map_err(|e| {
            match &e {
                BillingError::Provider(_)
                | BillingError::Storage(_)
                | BillingError::ConfigurationMissing(_) => {
                    tracing::error!(operation, error = %e, "Operation failed");
                }
                _ => tracing::debug!(operation, error = %e, "Operation rejected"),
            }
            to_graphql_error(e)
        })
    }
}

pub fn build_schema(gateway: Gateway) -> BillingSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription).data(gateway).finish()
}

fn to_graphql_error(err: BillingError) -> async_graphql::Error {
    let code = err.code();
    async_graphql::Error::new(err.user_message()).extend_with(|_, ext| ext.set("code", code))
}

fn money(amount: Decimal) -> f64 {
    amount.to_f64().unwrap_or_default()
}

// ============================================================================
// Output Types
// ============================================================================

#[derive(SimpleObject)]
#[graphql(rename_fields = "snake_case")]
pub struct Card {
    pub brand: String,
    pub last4: String,
    pub exp_month: i64,
    pub exp_year: i64,
}

#[derive(SimpleObject)]
#[graphql(rename_fields = "snake_case")]
pub struct PaymentMethod {
    pub id: String,
    #[graphql(name = "type")]
    pub kind: String,
    pub card: Option<Card>,
}

impl From<PaymentMethodView> for PaymentMethod {
    fn from(view: PaymentMethodView) -> Self {
        Self {
            id: view.id,
            kind: view.kind,
            card: view.card.map(|c| Card {
                brand: c.brand,
                last4: c.last4,
                exp_month: c.exp_month,
                exp_year: c.exp_year,
            }),
        }
    }
}

#[derive(SimpleObject)]
#[graphql(rename_fields = "snake_case")]
pub struct Subscription {
    pub id: String,
    pub status: String,
    pub plan_name: String,
    pub current_period_start: String,
    pub current_period_end: String,
    pub amount: f64,
    pub currency: String,
    pub billing_period: String,
    pub cancel_at_period_end: bool,
    pub payment_method: Option<PaymentMethod>,
}

impl From<SubscriptionView> for Subscription {
    fn from(view: SubscriptionView) -> Self {
        Self {
            id: view.id,
            status: view.status,
            plan_name: view.plan_name,
            current_period_start: view.current_period_start,
            current_period_end: view.current_period_end,
            amount: money(view.amount),
            currency: view.currency,
            billing_period: view.billing_period,
            cancel_at_period_end: view.cancel_at_period_end,
            payment_method: view.payment_method.map(Into::into),
        }
    }
}

#[derive(SimpleObject)]
#[graphql(rename_fields = "snake_case")]
pub struct Checkout {
    pub checkout_url: String,
    pub session_id: String,
    pub price_id: String,
    pub amount: f64,
    pub currency: String,
    pub product_id: String,
    pub billing_period: String,
}

impl From<CheckoutResult> for Checkout {
    fn from(result: CheckoutResult) -> Self {
        Self {
            checkout_url: result.checkout_url,
            session_id: result.session_id,
            price_id: result.price_id,
            amount: money(result.amount),
            currency: result.currency,
            product_id: result.product_id,
            billing_period: result.billing_period,
        }
    }
}

#[derive(SimpleObject)]
#[graphql(rename_fields = "snake_case")]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub sku: String,
    pub price: f64,
    pub currency: String,
    pub billing_period: String,
    pub description: Option<String>,
    pub tier: String,
    pub features: Vec<String>,
    pub is_popular: bool,
}

impl From<SubscriptionPlan> for Plan {
    fn from(plan: SubscriptionPlan) -> Self {
        Self {
            id: plan.id,
            name: plan.name,
            sku: plan.sku,
            price: money(plan.price),
            currency: plan.currency,
            billing_period: plan.billing_period,
            description: plan.description,
            tier: plan.tier.as_str().to_string(),
            features: plan.features,
            is_popular: plan.is_popular,
        }
    }
}

// ============================================================================
// Input Types
// ============================================================================

#[derive(InputObject)]
#[graphql(rename_fields = "snake_case")]
pub struct CreatePaymentIntentInput {
    pub order_number: String,
    pub product_id: String,
    pub billing_period: String,
}

#[derive(InputObject)]
#[graphql(rename_fields = "snake_case")]
pub struct CreateSubscriptionInput {
    pub product_id: String,
    pub payment_method_id: String,
    pub billing_period: String,
    pub setup_intent_id: Option<String>,
}

#[derive(InputObject)]
#[graphql(rename_fields = "snake_case")]
pub struct CancelSubscriptionInput {
    pub subscription_id: String,
    #[graphql(default = true)]
    pub cancel_at_period_end: bool,
}

#[derive(InputObject)]
#[graphql(rename_fields = "snake_case")]
pub struct ChangePaymentMethodInput {
    pub subscription_id: String,
    pub payment_method_id: String,
}

#[derive(InputObject)]
#[graphql(rename_fields = "snake_case")]
pub struct UpgradeSubscriptionInput {
    pub subscription_id: String,
    pub product_id: String,
    pub billing_period: String,
}

// ============================================================================
// Resolvers
// ============================================================================

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// The signed-in user's current subscription
    async fn customer_subscription(
        &self,
        ctx: &Context<'_>,
    ) -> async_graphql::Result<Option<Subscription>> {
        let gateway = ctx.data::<Gateway>()?;
        let identity = ctx.data::<ForwardedIdentity>()?;
        let service = gateway.authorized(identity).await?;
        let view = gateway
            .run(ops::LIST_SUBSCRIPTIONS, service.get_customer_subscription(identity))
            .await?;
        Ok(view.map(Into::into))
    }

    /// Cards saved on the user's billing account
    async fn saved_payment_methods(
        &self,
        ctx: &Context<'_>,
    ) -> async_graphql::Result<Vec<PaymentMethod>> {
        let gateway = ctx.data::<Gateway>()?;
        let identity = ctx.data::<ForwardedIdentity>()?;
        let service = gateway.authorized(identity).await?;
        let methods = gateway
            .run(ops::LIST_PAYMENT_METHODS, service.get_saved_payment_methods(identity))
            .await?;
        Ok(methods.into_iter().map(Into::into).collect())
    }

    /// Public plan listing; works without a billing provider
    async fn subscription_plans(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<Plan>> {
        let gateway = ctx.data::<Gateway>()?;
        let fut = billing_core::plans::list_subscription_plans(
            gateway.catalog.as_ref(),
            &gateway.billing,
        );
        let plans = gateway.run("catalog.plans", fut).await?;
        Ok(plans.into_iter().map(Into::into).collect())
    }
}

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    async fn create_payment_intent(
        &self,
        ctx: &Context<'_>,
        input: CreatePaymentIntentInput,
    ) -> async_graphql::Result<Checkout> {
        let gateway = ctx.data::<Gateway>()?;
        let identity = ctx.data::<ForwardedIdentity>()?;
        let service = gateway.authorized(identity).await?;
        let fut = service.create_payment_intent(
            identity,
            &input.order_number,
            &input.product_id,
            &input.billing_period,
        );
        Ok(gateway.run(ops::CREATE_CHECKOUT_SESSION, fut).await?.into())
    }

    async fn create_subscription(
        &self,
        ctx: &Context<'_>,
        input: CreateSubscriptionInput,
    ) -> async_graphql::Result<Subscription> {
        let gateway = ctx.data::<Gateway>()?;
        let identity = ctx.data::<ForwardedIdentity>()?;
        let service = gateway.authorized(identity).await?;
        let request = SubscriptionRequest {
            product_id: input.product_id,
            payment_method_id: input.payment_method_id,
            billing_period: input.billing_period,
            setup_intent_id: input.setup_intent_id.filter(|id| !id.trim().is_empty()),
        };
        let fut = service.create_subscription(identity, request);
        Ok(gateway.run(ops::CREATE_SUBSCRIPTION, fut).await?.into())
    }

    /// Cancels at period end unless `cancel_at_period_end` is false
    async fn cancel_subscription(
        &self,
        ctx: &Context<'_>,
        input: CancelSubscriptionInput,
    ) -> async_graphql::Result<bool> {
        let gateway = ctx.data::<Gateway>()?;
        let identity = ctx.data::<ForwardedIdentity>()?;
        let service = gateway.authorized(identity).await?;
        let fut = service.cancel_subscription(
            identity,
            &input.subscription_id,
            input.cancel_at_period_end,
        );
        gateway.run(ops::CANCEL_SUBSCRIPTION, fut).await
    }

    async fn change_payment_method(
        &self,
        ctx: &Context<'_>,
        input: ChangePaymentMethodInput,
    ) -> async_graphql::Result<Subscription> {
        let gateway = ctx.data::<Gateway>()?;
        let identity = ctx.data::<ForwardedIdentity>()?;
        let service = gateway.authorized(identity).await?;
        let fut = service.change_payment_method(
            identity,
            &input.subscription_id,
            &input.payment_method_id,
        );
        Ok(gateway.run(ops::UPDATE_SUBSCRIPTION, fut).await?.into())
    }

    async fn upgrade_subscription(
        &self,
        ctx: &Context<'_>,
        input: UpgradeSubscriptionInput,
    ) -> async_graphql::Result<Checkout> {
        let gateway = ctx.data::<Gateway>()?;
        let identity = ctx.data::<ForwardedIdentity>()?;
        let service = gateway.authorized(identity).await?;
        let request = UpgradeRequest {
            subscription_id: input.subscription_id,
            product_id: input.product_id,
            billing_period: input.billing_period,
        };
        let fut = service.upgrade_subscription(identity, request);
        Ok(gateway.run(ops::CREATE_CHECKOUT_SESSION, fut).await?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_graphql::{Request, Variables};
    use billing_core::{
        BillingInterval, BillingPrice, BillingSubscription, MemoryBillingProvider, MemoryCatalog,
        MemoryMappingStore, SubscriptionStatus,
    };
    use serde_json::json;

    struct TestGateway {
        provider: Arc<MemoryBillingProvider>,
        schema: BillingSchema,
    }

    fn gateway_with(provider: Option<Arc<MemoryBillingProvider>>) -> BillingSchema {
        let catalog: Arc<dyn Catalog> = Arc::new(MemoryCatalog::with_default_plans());
        let billing = BillingConfig {
            storefront_base_url: "https://shop.test".into(),
            ..BillingConfig::default()
        };
        let service = provider.map(|provider| {
            Arc::new(SubscriptionService::new(
                billing.clone(),
                provider,
                catalog.clone(),
                Arc::new(MemoryMappingStore::new()),
            ))
        });
        build_schema(Gateway {
            service,
            catalog,
            billing,
            timeout: Duration::from_secs(5),
        })
    }

    fn setup() -> TestGateway {
        let provider = Arc::new(MemoryBillingProvider::new());
        TestGateway {
            schema: gateway_with(Some(provider.clone())),
            provider,
        }
    }

    fn signed_in(query: &str) -> Request {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-user-id", axum::http::HeaderValue::from_static("7"));
        headers.insert(
            "x-user-email",
            axum::http::HeaderValue::from_static("ana@example.com"),
        );
        Request::new(query).data(ForwardedIdentity::from_headers(&headers))
    }

    fn anonymous(query: &str) -> Request {
        Request::new(query).data(ForwardedIdentity::default())
    }

    fn error_code(response: &async_graphql::Response) -> Option<String> {
        let error = response.errors.first()?;
        let value = serde_json::to_value(error).ok()?;
        value["extensions"]["code"].as_str().map(String::from)
    }

    #[tokio::test]
    async fn test_plans_are_public() {
        let t = setup();
        let query = r"{
            subscriptionPlans { id name price currency billing_period is_popular features }
        }";
        let response = t.schema.execute(anonymous(query)).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);

        let data = response.data.into_json().unwrap();
        let plans = data["subscriptionPlans"].as_array().unwrap();
        assert_eq!(plans.len(), 4);
        assert_eq!(plans[3]["billing_period"], "yearly");
        assert_eq!(plans[3]["is_popular"], true);
        assert_eq!(plans[0]["currency"], "BRL");
    }

    #[tokio::test]
    async fn test_plans_without_billing_provider() {
        let schema = gateway_with(None);
        let response = schema.execute(anonymous("{ subscriptionPlans { id } }")).await;
        assert!(response.errors.is_empty());

        let response = schema.execute(signed_in("{ customerSubscription { id } }")).await;
        assert_eq!(error_code(&response).as_deref(), Some("CONFIGURATION_MISSING"));
    }

    #[tokio::test]
    async fn test_anonymous_caller_refused_before_configuration() {
        let schema = gateway_with(None);
        for query in [
            "{ customerSubscription { id } }",
            "{ savedPaymentMethods { id } }",
            r#"mutation { cancelSubscription(input: { subscription_id: "sub_1" }) }"#,
        ] {
            let response = schema.execute(anonymous(query)).await;
            assert_eq!(error_code(&response).as_deref(), Some("UNAUTHENTICATED"), "{query}");
        }
    }

    #[tokio::test]
    async fn test_anonymous_caller_gets_unauthenticated() {
        let t = setup();
        let response = t.schema.execute(anonymous("{ savedPaymentMethods { id } }")).await;
        assert_eq!(error_code(&response).as_deref(), Some("UNAUTHENTICATED"));
    }

    #[tokio::test]
    async fn test_no_subscription_is_null() {
        let t = setup();
        let response = t.schema.execute(signed_in("{ customerSubscription { id status } }")).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        let data = response.data.into_json().unwrap();
        assert_eq!(data["customerSubscription"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_customer_subscription_is_formatted() {
        let t = setup();
        let customer = t.provider.add_customer("ana@example.com");
        let price = BillingPrice::recurring("price_1", "brl", 2999, BillingInterval::Month);
        let mut subscription =
            BillingSubscription::new("sub_live", &customer, SubscriptionStatus::Active)
                .with_local_user(7)
                .with_price(price);
        subscription.current_period_start = 1_700_000_000;
        t.provider.add_subscription(subscription);

        let query = r"{
            customerSubscription { id status amount currency billing_period current_period_start }
        }";
        let response = t.schema.execute(signed_in(query)).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);

        let data = response.data.into_json().unwrap();
        let sub = &data["customerSubscription"];
        assert_eq!(sub["id"], "sub_live");
        assert_eq!(sub["amount"], 29.99);
        assert_eq!(sub["currency"], "BRL");
        assert_eq!(sub["billing_period"], "monthly");
        assert_eq!(sub["current_period_start"], "2023-11-14 22:13:20");
    }

    #[tokio::test]
    async fn test_create_payment_intent_mutation() {
        let t = setup();
        let query = r#"
            mutation Checkout($input: CreatePaymentIntentInput!) {
                createPaymentIntent(input: $input) {
                    checkout_url session_id amount currency billing_period
                }
            }
        "#;
        let variables = Variables::from_json(json!({
            "input": {
                "order_number": "000000042",
                "product_id": "3",
                "billing_period": "monthly"
            }
        }));
        let response = t.schema.execute(signed_in(query).variables(variables)).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);

        let data = response.data.into_json().unwrap();
        assert_eq!(data["createPaymentIntent"]["amount"], 99.9);
        assert_eq!(data["createPaymentIntent"]["currency"], "BRL");
        assert_eq!(t.provider.checkout_sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_defaults_to_period_end() {
        let t = setup();
        let customer = t.provider.add_customer("ana@example.com");
        t.provider.add_subscription(
            BillingSubscription::new("sub_1", &customer, SubscriptionStatus::Active)
                .with_local_user(7),
        );

        let query = r#"mutation { cancelSubscription(input: { subscription_id: "sub_1" }) }"#;
        let response = t.schema.execute(signed_in(query)).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(response.data.into_json().unwrap()["cancelSubscription"], true);

        let sub = t.provider.subscription("sub_1").unwrap();
        assert!(sub.cancel_at_period_end);
        assert_eq!(sub.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn test_upgrade_to_basic_plan_is_invalid() {
        let t = setup();
        let query = r#"
            mutation {
                upgradeSubscription(input: {
                    subscription_id: "sub_1", product_id: "1", billing_period: "monthly"
                }) { checkout_url }
            }
        "#;
        let response = t.schema.execute(signed_in(query)).await;
        assert_eq!(error_code(&response).as_deref(), Some("INVALID_INPUT"));
        assert_eq!(response.errors[0].message, "Product must be a Pro plan for upgrade");
    }

    #[tokio::test]
    async fn test_provider_failure_keeps_message() {
        let t = setup();
        t.provider.add_customer("ana@example.com");
        t.provider.fail_on(
            ops::LIST_SUBSCRIPTIONS,
            ProviderError::new(ops::LIST_SUBSCRIPTIONS, "API unavailable"),
        );

        let response = t.schema.execute(signed_in("{ customerSubscription { id } }")).await;
        assert_eq!(error_code(&response).as_deref(), Some("PROVIDER_ERROR"));
        assert_eq!(response.errors[0].message, "API unavailable");
    }

    #[tokio::test]
    async fn test_slow_operation_times_out() {
        let gateway = Gateway {
            service: None,
            catalog: Arc::new(MemoryCatalog::with_default_plans()),
            billing: BillingConfig::default(),
            timeout: Duration::from_millis(10),
        };
        let slow = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        };
        let err = gateway.run(ops::LIST_SUBSCRIPTIONS, slow).await.unwrap_err();
        assert_eq!(err.message, "Request timed out");
    }
}
