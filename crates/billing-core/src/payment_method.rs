//! Payment method verification before a subscription is created

use crate::error::{
    BillingError, PaymentMethodIssue, ProviderErrorKind, Result, classify_provider_error,
};
use crate::model::PaymentMethod;
use crate::provider::BillingProvider;

/// Check a confirmed setup intent against the customer and payment method.
///
/// A provider failure while fetching the intent skips the check; the
/// payment method itself is still verified afterwards.
pub async fn verify_setup_intent(
    provider: &dyn BillingProvider,
    setup_intent_id: &str,
    customer_id: &str,
    payment_method_id: &str,
) -> Result<()> {
    let intent = match provider.retrieve_setup_intent(setup_intent_id).await {
        Ok(intent) => intent,
        Err(BillingError::Provider(e)) => {
            tracing::warn!(
                setup_intent_id,
                error = %e,
                "Setup intent lookup failed, skipping verification"
            );
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    if intent.customer.as_deref() != Some(customer_id) {
        return Err(BillingError::OwnershipMismatch(format!(
            "setup intent {setup_intent_id} was created for another customer"
        )));
    }
    if !intent.is_succeeded() {
        return Err(BillingError::PaymentMethod(PaymentMethodIssue::SetupNotConfirmed));
    }
    if intent.payment_method.as_deref() != Some(payment_method_id) {
        return Err(BillingError::PaymentMethod(PaymentMethodIssue::SetupMismatch));
    }
    Ok(())
}

/// Make sure `payment_method_id` is attached to `customer_id`, attaching it
/// when it is free.
pub async fn ensure_attached(
    provider: &dyn BillingProvider,
    payment_method_id: &str,
    customer_id: &str,
) -> Result<PaymentMethod> {
    let payment_method = provider
        .retrieve_payment_method(payment_method_id)
        .await
        .map_err(translate_lookup_error)?;

    match payment_method.customer.as_deref() {
        Some(owner) if owner == customer_id => Ok(payment_method),
        Some(_) => Err(BillingError::PaymentMethod(PaymentMethodIssue::AttachedElsewhere)),
        None => attach(provider, payment_method_id, customer_id).await,
    }
}

async fn attach(
    provider: &dyn BillingProvider,
    payment_method_id: &str,
    customer_id: &str,
) -> Result<PaymentMethod> {
    let err = match provider.attach_payment_method(payment_method_id, customer_id).await {
        Ok(attached) => {
            tracing::info!(payment_method_id, customer_id, "Attached payment method");
            return Ok(attached);
        }
        Err(e) => e,
    };

    match provider_kind(&err) {
        Some(ProviderErrorKind::NotReusable) => {
            Err(BillingError::PaymentMethod(PaymentMethodIssue::NotReusable))
        }
        Some(ProviderErrorKind::AlreadyAttached) => {
            // Lost a race; accept only if the winner attached it to us.
            let current = provider
                .retrieve_payment_method(payment_method_id)
                .await
                .map_err(|_| BillingError::PaymentMethod(PaymentMethodIssue::Unverifiable))?;
            if current.customer.as_deref() == Some(customer_id) {
                Ok(current)
            } else {
                Err(BillingError::PaymentMethod(PaymentMethodIssue::AttachedElsewhere))
            }
        }
        _ => Err(err),
    }
}

fn provider_kind(err: &BillingError) -> Option<ProviderErrorKind> {
    match err {
        BillingError::Provider(e) => Some(classify_provider_error(e)),
        _ => None,
    }
}

fn translate_lookup_error(err: BillingError) -> BillingError {
    match provider_kind(&err) {
        Some(ProviderErrorKind::NotReusable) => {
            BillingError::PaymentMethod(PaymentMethodIssue::NotReusable)
        }
        Some(ProviderErrorKind::AlreadyAttached) => {
            BillingError::PaymentMethod(PaymentMethodIssue::AttachedElsewhere)
        }
        Some(ProviderErrorKind::NotFound) => BillingError::not_found("Payment method"),
        _ => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::model::SetupIntent;
    use crate::provider::{MemoryBillingProvider, ops};

    fn pm(id: &str, customer: Option<&str>) -> PaymentMethod {
        PaymentMethod {
            id: id.into(),
            kind: "card".into(),
            customer: customer.map(Into::into),
            card: None,
        }
    }

    fn intent(customer: &str, status: &str, payment_method: &str) -> SetupIntent {
        SetupIntent {
            id: "seti_1".into(),
            customer: Some(customer.into()),
            status: status.into(),
            payment_method: Some(payment_method.into()),
        }
    }

    #[tokio::test]
    async fn test_attaches_free_payment_method() {
        let provider = MemoryBillingProvider::new();
        provider.add_payment_method(pm("pm_1", None));

        let attached = ensure_attached(&provider, "pm_1", "cus_me").await.unwrap();
        assert_eq!(attached.customer.as_deref(), Some("cus_me"));
        assert_eq!(provider.calls(ops::ATTACH_PAYMENT_METHOD), 1);
    }

    #[tokio::test]
    async fn test_already_ours_skips_attach() {
        let provider = MemoryBillingProvider::new();
        provider.add_payment_method(pm("pm_1", Some("cus_me")));

        ensure_attached(&provider, "pm_1", "cus_me").await.unwrap();
        assert_eq!(provider.calls(ops::ATTACH_PAYMENT_METHOD), 0);
    }

    #[tokio::test]
    async fn test_attached_elsewhere_is_rejected() {
        let provider = MemoryBillingProvider::new();
        provider.add_payment_method(pm("pm_1", Some("cus_other")));

        let err = ensure_attached(&provider, "pm_1", "cus_me").await.unwrap_err();
        assert!(matches!(err, BillingError::PaymentMethod(PaymentMethodIssue::AttachedElsewhere)));
    }

    #[tokio::test]
    async fn test_reused_payment_method_is_translated() {
        let provider = MemoryBillingProvider::new();
        provider.add_payment_method(pm("pm_1", None));
        provider.fail_on(
            ops::ATTACH_PAYMENT_METHOD,
            ProviderError::new(
                ops::ATTACH_PAYMENT_METHOD,
                "This PaymentMethod was previously used without being attached to a Customer \
                 or was detached from a Customer, and may not be used again.",
            ),
        );

        let err = ensure_attached(&provider, "pm_1", "cus_me").await.unwrap_err();
        assert!(matches!(err, BillingError::PaymentMethod(PaymentMethodIssue::NotReusable)));
    }

    #[tokio::test]
    async fn test_attach_race_lost_to_other_customer() {
        let provider = MemoryBillingProvider::new();
        provider.add_payment_method(pm("pm_1", None));
        provider.fail_on(
            ops::ATTACH_PAYMENT_METHOD,
            ProviderError::new(
                ops::ATTACH_PAYMENT_METHOD,
                "The payment method has already been attached to a customer.",
            ),
        );

        let err = ensure_attached(&provider, "pm_1", "cus_me").await.unwrap_err();
        assert!(matches!(err, BillingError::PaymentMethod(PaymentMethodIssue::AttachedElsewhere)));
        assert_eq!(provider.calls(ops::RETRIEVE_PAYMENT_METHOD), 2);
    }

    #[tokio::test]
    async fn test_missing_payment_method() {
        let provider = MemoryBillingProvider::new();
        let err = ensure_attached(&provider, "pm_gone", "cus_me").await.unwrap_err();
        assert!(matches!(err, BillingError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_setup_intent_checks() {
        let provider = MemoryBillingProvider::new();

        provider.add_setup_intent(intent("cus_me", "succeeded", "pm_1"));
        verify_setup_intent(&provider, "seti_1", "cus_me", "pm_1").await.unwrap();

        let err = verify_setup_intent(&provider, "seti_1", "cus_other", "pm_1").await.unwrap_err();
        assert!(matches!(err, BillingError::OwnershipMismatch(_)));

        let err = verify_setup_intent(&provider, "seti_1", "cus_me", "pm_2").await.unwrap_err();
        assert!(matches!(err, BillingError::PaymentMethod(PaymentMethodIssue::SetupMismatch)));

        provider.add_setup_intent(intent("cus_me", "requires_confirmation", "pm_1"));
        let err = verify_setup_intent(&provider, "seti_1", "cus_me", "pm_1").await.unwrap_err();
        assert!(matches!(err, BillingError::PaymentMethod(PaymentMethodIssue::SetupNotConfirmed)));
    }

    #[tokio::test]
    async fn test_unreadable_setup_intent_is_skipped() {
        let provider = MemoryBillingProvider::new();
        verify_setup_intent(&provider, "seti_missing", "cus_me", "pm_1").await.unwrap();
    }
}
