//! # billing-stripe
//!
//! Stripe implementation of [`billing_core::BillingProvider`].
//!
//! ```text
//! SubscriptionService ──▶ BillingProvider ──▶ StripeBillingProvider ──▶ api.stripe.com
//!                                   │
//!                                   └──────▶ MemoryBillingProvider (tests, local runs)
//! ```
//!
//! Customers and prices are found through the search endpoints
//! (`/v1/customers/search`, `/v1/prices/search`); everything else uses the
//! typed `async-stripe` calls. Stripe error codes are kept in
//! `ProviderError::code` in snake case (`resource_missing`, ...).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use billing_stripe::StripeBillingProvider;
//!
//! // Reads STRIPE_SECRET_KEY
//! let provider = StripeBillingProvider::from_env()?;
//! ```

mod client;
mod config;
mod convert;

pub use client::StripeBillingProvider;
pub use config::{InvalidApiKey, StripeConfig};
