//! # billing-core
//!
//! Reconciles store users with a recurring-billing provider: finds (or
//! creates) the right billing customer, the right price and the one
//! subscription that represents the user's plan, even when several billing
//! customers share an email or the stored mapping is missing.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    SubscriptionService                       │
//! │  ┌──────────────────┐ ┌───────────────┐ ┌─────────────────┐  │
//! │  │ CustomerResolver │ │ PriceResolver │ │ Formatter       │  │
//! │  │  + selector      │ │               │ │                 │  │
//! │  └──────────────────┘ └───────────────┘ └─────────────────┘  │
//! └────────┬───────────────────┬──────────────────┬──────────────┘
//!          │                   │                  │
//!   MappingStore        BillingProvider        Catalog
//!   (local, sync)       (Strategy, async)      (store products)
//! ```
//!
//! The `BillingProvider` trait keeps the provider SDK out of this crate;
//! `MemoryBillingProvider` implements it for tests and local runs.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use billing_core::{BillingConfig, MemoryBillingProvider, MemoryCatalog, MemoryMappingStore,
//!     StaticIdentity, LocalUser, SubscriptionService};
//!
//! let service = SubscriptionService::new(
//!     BillingConfig::default().validated()?,
//!     Arc::new(MemoryBillingProvider::new()),
//!     Arc::new(MemoryCatalog::with_default_plans()),
//!     Arc::new(MemoryMappingStore::new()),
//! );
//!
//! let me = StaticIdentity::user(LocalUser::new(7, "user@example.com"));
//! let current = service.get_customer_subscription(&me).await?;
//! ```

pub mod catalog;
pub mod config;
pub mod customer;
pub mod error;
pub mod format;
pub mod identity;
pub mod mapping;
pub mod model;
pub mod payment_method;
pub mod plans;
pub mod price;
pub mod provider;
pub mod selector;
pub mod service;

pub use catalog::{Catalog, MemoryCatalog};
pub use config::BillingConfig;
pub use customer::{CustomerResolver, ResolvedCustomer};
pub use error::{
    BillingError, PaymentMethodIssue, ProviderError, ProviderErrorKind, Result,
    classify_provider_error,
};
pub use format::{CardView, PaymentMethodView, SubscriptionFormatter, SubscriptionView};
pub use identity::{IdentityProvider, StaticIdentity};
pub use mapping::{JsonFileMappingStore, MappingStore, MemoryMappingStore};
pub use model::{
    BillingCustomer, BillingInterval, BillingPrice, BillingSubscription, CardDetails,
    CheckoutSession, CustomerMapping, LOCAL_USER_ID_KEY, LocalUser, PaymentMethod,
    PaymentMethodRef, Product, ProductRef, SetupIntent, SubscriptionStatus, UserId,
};
pub use plans::{PlanTier, SubscriptionPlan};
pub use price::{PriceResolver, normalize_sku};
pub use provider::{BillingProvider, MemoryBillingProvider};
pub use selector::{Selection, SelectionRule, select_subscription};
pub use service::{CheckoutResult, SubscriptionRequest, SubscriptionService, UpgradeRequest};
