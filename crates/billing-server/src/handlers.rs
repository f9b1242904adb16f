//! HTTP Handlers

use axum::{
    Json,
    extract::State,
    http::HeaderMap,
    response::{Html, IntoResponse},
};
use serde::Serialize;

use crate::identity::ForwardedIdentity;
use crate::state::AppState;

pub const GRAPHQL_PATH: &str = "/graphql";

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub billing_configured: bool,
    pub billing_provider: Option<String>,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        billing_configured: state.billing_provider.is_some(),
        billing_provider: state.billing_provider,
    })
}

/// Execute a GraphQL request as the forwarded user
pub async fn graphql_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<async_graphql::Request>,
) -> Json<async_graphql::Response> {
    let identity = ForwardedIdentity::from_headers(&headers);
    Json(state.schema.execute(request.data(identity)).await)
}

/// GraphiQL explorer
pub async fn graphiql() -> impl IntoResponse {
    Html(async_graphql::http::GraphiQLSource::build().endpoint(GRAPHQL_PATH).finish())
}
