//! Customer Resolution
//!
//! Maps a local user onto exactly one billing customer.
//!
//! ```text
//! mapping? ──yes──▶ mapped id (no remote call)
//!    │no
//!    ▼
//! search by email ──none──▶ NotFound
//!    │candidates
//!    ▼
//! list subscriptions per candidate
//! rule 1 over all candidates, then rule 2, ...
//!    │first hit
//!    ▼
//! upsert mapping ──▶ winner
//! ```

use std::sync::Arc;

use crate::error::{BillingError, Result};
use crate::mapping::MappingStore;
use crate::model::{BillingCustomer, BillingSubscription, LocalUser};
use crate::provider::{BillingProvider, NewCustomer};
use crate::selector::SelectionRule;

/// A resolved customer, with the subscription that decided it when the
/// answer came from a search
#[derive(Clone, Debug)]
pub struct ResolvedCustomer {
    pub customer_id: String,
    pub subscription: Option<BillingSubscription>,
}

/// Resolves local users to billing customers
pub struct CustomerResolver {
    provider: Arc<dyn BillingProvider>,
    mappings: Arc<dyn MappingStore>,
    page_size: u8,
}

impl CustomerResolver {
    pub fn new(
        provider: Arc<dyn BillingProvider>,
        mappings: Arc<dyn MappingStore>,
        page_size: u8,
    ) -> Self {
        Self {
            provider,
            mappings,
            page_size,
        }
    }

    /// The billing customer id for `user`, or `NotFound`
    pub async fn resolve_billing_customer(&self, user: &LocalUser) -> Result<String> {
        Ok(self.resolve(user).await?.customer_id)
    }

    /// Like [`Self::resolve_billing_customer`], keeping the deciding subscription
    pub async fn resolve(&self, user: &LocalUser) -> Result<ResolvedCustomer> {
        if let Some(mapping) = self.mappings.get(user.user_id)? {
            tracing::debug!(
                user_id = user.user_id,
                customer_id = %mapping.billing_customer_id,
                "Using stored customer mapping"
            );
            return Ok(ResolvedCustomer {
                customer_id: mapping.billing_customer_id,
                subscription: None,
            });
        }

        let candidates = self.provider.search_customers_by_email(&user.email).await?;
        if candidates.is_empty() {
            tracing::debug!(user_id = user.user_id, "No billing customer with this email");
            return Err(BillingError::not_found("Billing customer"));
        }

        self.pick(user, &candidates).await
    }

    /// Resolve, or create the billing customer when there is none
    pub async fn ensure_billing_customer(&self, user: &LocalUser) -> Result<String> {
        if let Some(mapping) = self.mappings.get(user.user_id)? {
            return Ok(mapping.billing_customer_id);
        }

        let candidates = self.provider.search_customers_by_email(&user.email).await?;
        if let Some(first) = candidates.first() {
            match self.pick(user, &candidates).await {
                Ok(resolved) => return Ok(resolved.customer_id),
                Err(BillingError::NotFound(_)) => {
                    // Nobody has subscriptions yet; reuse instead of minting another duplicate.
                    tracing::info!(
                        user_id = user.user_id,
                        customer_id = %first.id,
                        candidates = candidates.len(),
                        "Reusing existing billing customer"
                    );
                    self.mappings.upsert(user.user_id, &first.id)?;
                    return Ok(first.id.clone());
                }
                Err(e) => return Err(e),
            }
        }

        let created = self
            .provider
            .create_customer(NewCustomer {
                email: user.email.clone(),
                local_user_id: user.user_id,
            })
            .await?;
        tracing::info!(
            user_id = user.user_id,
            customer_id = %created.id,
            "Created billing customer"
        );

        self.mappings.upsert(user.user_id, &created.id)?;
        Ok(created.id)
    }

    async fn pick(
        &self,
        user: &LocalUser,
        candidates: &[BillingCustomer],
    ) -> Result<ResolvedCustomer> {
        let mut listed = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let subscriptions = self
                .provider
                .list_subscriptions(&candidate.id, self.page_size)
                .await?;
            listed.push((candidate, subscriptions));
        }

        for rule in SelectionRule::ORDER {
            for (candidate, subscriptions) in &listed {
                if let Some(subscription) = rule.find(subscriptions, user.user_id) {
                    tracing::info!(
                        user_id = user.user_id,
                        customer_id = %candidate.id,
                        subscription_id = %subscription.id,
                        rule = rule.rank(),
                        candidates = candidates.len(),
                        "Resolved billing customer by subscription"
                    );
                    self.mappings.upsert(user.user_id, &candidate.id)?;
                    return Ok(ResolvedCustomer {
                        customer_id: candidate.id.clone(),
                        subscription: Some(subscription.clone()),
                    });
                }
            }
        }

        tracing::debug!(
            user_id = user.user_id,
            candidates = candidates.len(),
            "No candidate has subscriptions"
        );
        Err(BillingError::not_found("Billing customer"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::mapping::MemoryMappingStore;
    use crate::model::SubscriptionStatus;
    use crate::provider::{MemoryBillingProvider, ops};

    const EMAIL: &str = "maria@example.com";

    fn setup() -> (Arc<MemoryBillingProvider>, Arc<MemoryMappingStore>, CustomerResolver) {
        let provider = Arc::new(MemoryBillingProvider::new());
        let mappings = Arc::new(MemoryMappingStore::new());
        let resolver = CustomerResolver::new(provider.clone(), mappings.clone(), 100);
        (provider, mappings, resolver)
    }

    fn user() -> LocalUser {
        LocalUser::new(42, EMAIL)
    }

    #[tokio::test]
    async fn test_fast_path_makes_no_remote_call() {
        let (provider, mappings, resolver) = setup();
        mappings.upsert(42, "cus_mapped").unwrap();

        let id = resolver.resolve_billing_customer(&user()).await.unwrap();
        assert_eq!(id, "cus_mapped");
        assert_eq!(provider.calls(ops::SEARCH_CUSTOMERS), 0);
        assert_eq!(provider.calls(ops::LIST_SUBSCRIPTIONS), 0);
    }

    #[tokio::test]
    async fn test_picks_second_of_three_and_persists() {
        let (provider, mappings, resolver) = setup();
        let first = provider.add_customer(EMAIL);
        let second = provider.add_customer(EMAIL);
        let third = provider.add_customer(EMAIL);
        provider.add_subscription(
            BillingSubscription::new("sub_2", &second, SubscriptionStatus::Active)
                .with_local_user(42),
        );
        provider.add_subscription(BillingSubscription::new(
            "sub_3",
            &third,
            SubscriptionStatus::Canceled,
        ));

        let resolved = resolver.resolve(&user()).await.unwrap();
        assert_eq!(resolved.customer_id, second);
        assert_eq!(resolved.subscription.map(|s| s.id), Some("sub_2".to_string()));
        assert_ne!(resolved.customer_id, first);
        assert_eq!(mappings.get(42).unwrap().unwrap().billing_customer_id, second);

        // Second lookup is served from the mapping
        resolver.resolve_billing_customer(&user()).await.unwrap();
        assert_eq!(provider.calls(ops::SEARCH_CUSTOMERS), 1);
    }

    #[tokio::test]
    async fn test_rules_are_tried_across_all_candidates_first() {
        let (provider, _, resolver) = setup();
        let active_unowned = provider.add_customer(EMAIL);
        let canceled_owned = provider.add_customer(EMAIL);
        provider.add_subscription(BillingSubscription::new(
            "sub_a",
            &active_unowned,
            SubscriptionStatus::Active,
        ));
        provider.add_subscription(
            BillingSubscription::new("sub_b", &canceled_owned, SubscriptionStatus::Canceled)
                .with_local_user(42),
        );

        let id = resolver.resolve_billing_customer(&user()).await.unwrap();
        assert_eq!(id, canceled_owned);
    }

    #[tokio::test]
    async fn test_no_customers_is_not_found() {
        let (_, mappings, resolver) = setup();
        let err = resolver.resolve_billing_customer(&user()).await.unwrap_err();
        assert!(matches!(err, BillingError::NotFound(_)));
        assert!(mappings.is_empty());
    }

    #[tokio::test]
    async fn test_candidates_without_subscriptions_is_not_found() {
        let (provider, mappings, resolver) = setup();
        provider.add_customer(EMAIL);
        provider.add_customer(EMAIL);

        let err = resolver.resolve_billing_customer(&user()).await.unwrap_err();
        assert!(matches!(err, BillingError::NotFound(_)));
        assert_eq!(provider.calls(ops::LIST_SUBSCRIPTIONS), 2);
        assert!(mappings.is_empty());
    }

    #[tokio::test]
    async fn test_listing_failure_propagates() {
        let (provider, _, resolver) = setup();
        provider.add_customer(EMAIL);
        provider.fail_on(
            ops::LIST_SUBSCRIPTIONS,
            ProviderError::new(ops::LIST_SUBSCRIPTIONS, "boom"),
        );

        let err = resolver.resolve_billing_customer(&user()).await.unwrap_err();
        assert!(matches!(err, BillingError::Provider(_)));
    }

    #[tokio::test]
    async fn test_ensure_creates_when_missing() {
        let (provider, mappings, resolver) = setup();
        let id = resolver.ensure_billing_customer(&user()).await.unwrap();

        assert_eq!(provider.calls(ops::CREATE_CUSTOMER), 1);
        assert_eq!(mappings.get(42).unwrap().unwrap().billing_customer_id, id);
        assert_eq!(provider.customers()[0].email.as_deref(), Some(EMAIL));
    }

    #[tokio::test]
    async fn test_ensure_reuses_first_candidate() {
        let (provider, _, resolver) = setup();
        let first = provider.add_customer(EMAIL);
        provider.add_customer(EMAIL);

        let id = resolver.ensure_billing_customer(&user()).await.unwrap();
        assert_eq!(id, first);
        assert_eq!(provider.calls(ops::CREATE_CUSTOMER), 0);
    }
}
