//! billing-server
//!
//! Axum server hosting the subscription GraphQL gateway. The storefront
//! forwards the signed-in user in `x-user-id` / `x-user-email`.

mod config;
mod graphql;
mod handlers;
mod identity;
mod state;

use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    routing::get,
};
use billing_core::BillingProvider;
use billing_stripe::StripeBillingProvider;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::handlers::{GRAPHQL_PATH, graphiql, graphql_handler, health_check};
use crate::identity::{USER_EMAIL_HEADER, USER_ID_HEADER};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;

    let provider: Option<Arc<dyn BillingProvider>> = match StripeBillingProvider::from_env() {
        Ok(stripe) => {
            tracing::info!("Stripe configured");
            Some(Arc::new(stripe))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Stripe not configured, billing operations disabled");
            None
        }
    };

    let state = AppState::build(&config, provider)?;
    let app = router(state, &config);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(
        addr = %config.bind_addr,
        currency = %config.billing.currency,
        timeout_secs = config.request_timeout.as_secs(),
        "billing-server listening"
    );
    tracing::info!("  POST {GRAPHQL_PATH} - GraphQL gateway");
    tracing::info!("  GET  {GRAPHQL_PATH} - GraphiQL");
    tracing::info!("  GET  /health   - Health check");

    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(GRAPHQL_PATH, get(graphiql).post(graphql_handler))
        .layer(cors_layer(&config.cors_allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(USER_ID_HEADER),
            HeaderName::from_static(USER_EMAIL_HEADER),
        ]);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(allowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use billing_core::MemoryBillingProvider;
    use tower::ServiceExt;

    fn app(provider: Option<Arc<dyn BillingProvider>>) -> Router {
        let config = ServerConfig::default();
        router(AppState::build(&config, provider).unwrap(), &config)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_billing_state() {
        let response = app(None)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["billing_configured"], false);

        let provider: Arc<dyn BillingProvider> = Arc::new(MemoryBillingProvider::new());
        let body = body_json(
            app(Some(provider))
                .oneshot(Request::get("/health").body(Body::empty()).unwrap())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(body["billing_configured"], true);
        assert_eq!(body["billing_provider"], "MemoryBilling");
    }

    #[tokio::test]
    async fn test_graphql_over_http_uses_forwarded_identity() {
        let provider = Arc::new(MemoryBillingProvider::new());
        provider.add_customer("ana@example.com");
        let app = app(Some(provider as Arc<dyn BillingProvider>));

        let request = Request::post(GRAPHQL_PATH)
            .header(header::CONTENT_TYPE, "application/json")
            .header(USER_ID_HEADER, "7")
            .header(USER_EMAIL_HEADER, "ana@example.com")
            .body(Body::from(
                r#"{"query":"{ customerSubscription { id } savedPaymentMethods { id } }"}"#,
            ))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body.get("errors").is_none(), "{body}");
        assert_eq!(body["data"]["customerSubscription"], serde_json::Value::Null);
        assert_eq!(body["data"]["savedPaymentMethods"], serde_json::json!([]));

        let anonymous = Request::post(GRAPHQL_PATH)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"query":"{ customerSubscription { id } }"}"#))
            .unwrap();
        let body = body_json(app.oneshot(anonymous).await.unwrap()).await;
        assert_eq!(body["errors"][0]["extensions"]["code"], "UNAUTHENTICATED");
    }

    #[tokio::test]
    async fn test_graphiql_page() {
        let response = app(None)
            .oneshot(Request::get(GRAPHQL_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("graphiql"));
    }
}
