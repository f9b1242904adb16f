//! Billing Error Types
//!
//! One taxonomy for every layer. Provider failures are carried verbatim in
//! [`ProviderError`] and translated in exactly one place,
//! [`classify_provider_error`].

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, BillingError>;

/// Billing-related errors
#[derive(Error, Debug, Clone)]
pub enum BillingError {
    /// No authenticated caller
    #[error("Not authenticated")]
    Unauthenticated,

    /// Required configuration (API key, catalog, ...) is absent
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    /// Customer, subscription, product or price could not be located
    #[error("Not found: {0}")]
    NotFound(String),

    /// Entity belongs to a different user
    #[error("Ownership mismatch: {0}")]
    OwnershipMismatch(String),

    /// Payment method cannot be used for this customer
    #[error("Payment method rejected: {0}")]
    PaymentMethod(PaymentMethodIssue),

    /// Remote billing provider failure
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Caller supplied something we cannot work with
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Mapping store failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl BillingError {
    /// Shorthand for [`BillingError::NotFound`]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Shorthand for [`BillingError::InvalidInput`]
    pub fn invalid(what: impl Into<String>) -> Self {
        Self::InvalidInput(what.into())
    }

    /// True for `NotFound` and for provider errors that classify as missing resources.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Provider(err) => classify_provider_error(err) == ProviderErrorKind::NotFound,
            _ => false,
        }
    }

    /// Stable machine-readable code (placed in GraphQL error extensions)
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::ConfigurationMissing(_) => "CONFIGURATION_MISSING",
            Self::NotFound(_) => "NOT_FOUND",
            Self::OwnershipMismatch(_) => "OWNERSHIP_MISMATCH",
            Self::PaymentMethod(_) => "PAYMENT_METHOD_REJECTED",
            Self::Provider(_) => "PROVIDER_ERROR",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthenticated => "You must be signed in to manage your subscription.".into(),
            Self::ConfigurationMissing(_) => "Billing is not configured.".into(),
            Self::NotFound(what) => format!("{what} not found."),
            Self::OwnershipMismatch(_) => "This item belongs to another account.".into(),
            Self::PaymentMethod(issue) => issue.user_message().into(),
            Self::Provider(err) => err.message.clone(),
            Self::InvalidInput(what) => what.clone(),
            Self::Storage(_) => "An error occurred processing your request.".into(),
        }
    }
}

/// Why a payment method was refused
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentMethodIssue {
    /// Used once without a customer, or detached; the provider refuses reuse
    NotReusable,
    /// Attached to some other billing customer
    AttachedElsewhere,
    /// The setup intent has not succeeded
    SetupNotConfirmed,
    /// The setup intent confirmed a different payment method
    SetupMismatch,
    /// Attachment could not be confirmed after a concurrent attach
    Unverifiable,
}

impl PaymentMethodIssue {
    pub fn user_message(self) -> &'static str {
        match self {
            Self::NotReusable => {
                "This payment method has already been used and cannot be reused. \
                 Please add a new card."
            }
            Self::AttachedElsewhere => {
                "This payment method is already associated with another account."
            }
            Self::SetupNotConfirmed => {
                "Payment method setup has not been confirmed. Please try again."
            }
            Self::SetupMismatch => "Payment method does not match the confirmed setup.",
            Self::Unverifiable => {
                "Unable to verify the payment method. Please go back to checkout and try again."
            }
        }
    }
}

impl std::fmt::Display for PaymentMethodIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.user_message())
    }
}

/// A failure reported by the billing provider, message preserved
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed: {message}")]
pub struct ProviderError {
    /// Provider call that failed, e.g. `subscriptions.list`
    pub operation: String,
    /// Structured provider error code (`resource_missing`, ...)
    pub code: Option<String>,
    /// HTTP status, when the failure came from an HTTP response
    pub http_status: Option<u16>,
    /// Human-readable provider message
    pub message: String,
}

impl ProviderError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            code: None,
            http_status: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }
}

/// Coarse meaning of a provider failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
    NotFound,
    NotReusable,
    AlreadyAttached,
    Other,
}

/// Translate a provider failure. Structured codes win; the message is only
/// consulted when no code matched.
pub fn classify_provider_error(err: &ProviderError) -> ProviderErrorKind {
    let by_code = err.code.as_deref().and_then(|code| match code {
        "resource_missing" => Some(ProviderErrorKind::NotFound),
        "payment_method_unexpected_state" => Some(ProviderErrorKind::NotReusable),
        "payment_method_already_attached" | "payment_method_attached_to_other_customer" => {
            Some(ProviderErrorKind::AlreadyAttached)
        }
        _ => None,
    });
    if let Some(kind) = by_code {
        return kind;
    }

    let message = err.message.to_lowercase();
    if message.contains("previously used") || message.contains("detached") {
        ProviderErrorKind::NotReusable
    } else if message.contains("already been attached") || message.contains("attached") {
        ProviderErrorKind::AlreadyAttached
    } else if message.starts_with("no such") || err.http_status == Some(404) {
        ProviderErrorKind::NotFound
    } else {
        ProviderErrorKind::Other
    }
}
