//! Application State

use std::sync::Arc;

use billing_core::{
    BillingProvider, Catalog, JsonFileMappingStore, MappingStore, MemoryCatalog, MemoryMappingStore,
    SubscriptionService,
};

use crate::config::ServerConfig;
use crate::graphql::{BillingSchema, Gateway, build_schema};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// GraphQL schema with the gateway attached
    pub schema: BillingSchema,

    /// Provider name, `None` when billing is not configured
    pub billing_provider: Option<String>,
}

impl AppState {
    /// Wire the service from config; `provider` is optional so the plan
    /// listing keeps working without billing credentials.
    pub fn build(
        config: &ServerConfig,
        provider: Option<Arc<dyn BillingProvider>>,
    ) -> anyhow::Result<Self> {
        let catalog: Arc<dyn Catalog> = match &config.catalog_path {
            Some(path) => Arc::new(MemoryCatalog::from_json_file(path)?),
            None => Arc::new(MemoryCatalog::with_default_plans()),
        };
        let mappings: Arc<dyn MappingStore> = match &config.mapping_store_path {
            Some(path) => Arc::new(JsonFileMappingStore::open(path)?),
            None => Arc::new(MemoryMappingStore::new()),
        };

        let billing_provider = provider.as_ref().map(|p| p.name().to_string());
        let service = provider.map(|provider| {
            Arc::new(SubscriptionService::new(
                config.billing.clone(),
                provider,
                catalog.clone(),
                mappings,
            ))
        });

        let schema = build_schema(Gateway {
            service,
            catalog,
            billing: config.billing.clone(),
            timeout: config.request_timeout,
        });
        Ok(Self {
            schema,
            billing_provider,
        })
    }
}
