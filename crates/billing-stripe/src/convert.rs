//! Stripe object → billing-core model conversions

use billing_core::{
    BillingCustomer, BillingInterval, BillingPrice, BillingSubscription, CardDetails, PaymentMethod,
    PaymentMethodRef, ProductRef, SetupIntent, SubscriptionStatus,
};
use stripe::{Expandable, RecurringInterval};

pub fn customer(customer: stripe::Customer) -> BillingCustomer {
    BillingCustomer {
        id: customer.id.to_string(),
        email: customer.email,
    }
}

pub fn price(price: stripe::Price) -> BillingPrice {
    let product = price.product.map(|product| match product {
        Expandable::Id(id) => ProductRef::Id(id.to_string()),
        Expandable::Object(product) => ProductRef::Expanded {
            id: product.id.to_string(),
            name: product.name,
        },
    });
    let interval = price.recurring.and_then(|recurring| match recurring.interval {
        RecurringInterval::Month => Some(BillingInterval::Month),
        RecurringInterval::Year => Some(BillingInterval::Year),
        _ => None,
    });

    BillingPrice {
        id: price.id.to_string(),
        currency: price.currency.map(|c| c.to_string()).unwrap_or_default(),
        unit_amount: price.unit_amount,
        nickname: price.nickname,
        product,
        interval,
        metadata: price.metadata.unwrap_or_default(),
    }
}

pub fn subscription(subscription: stripe::Subscription) -> BillingSubscription {
    let default_payment_method = subscription.default_payment_method.map(|pm| match pm {
        Expandable::Id(id) => PaymentMethodRef::Id(id.to_string()),
        Expandable::Object(pm) => PaymentMethodRef::Expanded(payment_method(*pm)),
    });

    BillingSubscription {
        id: subscription.id.to_string(),
        customer_id: subscription.customer.id().to_string(),
        status: status(subscription.status),
        metadata: subscription.metadata,
        items: subscription
            .items
            .data
            .into_iter()
            .filter_map(|item| item.price)
            .map(price)
            .collect(),
        current_period_start: subscription.current_period_start,
        current_period_end: subscription.current_period_end,
        cancel_at_period_end: subscription.cancel_at_period_end,
        default_payment_method,
    }
}

pub fn status(status: stripe::SubscriptionStatus) -> SubscriptionStatus {
    match status {
        stripe::SubscriptionStatus::Active => SubscriptionStatus::Active,
        stripe::SubscriptionStatus::Trialing => SubscriptionStatus::Trialing,
        stripe::SubscriptionStatus::PastDue => SubscriptionStatus::PastDue,
        stripe::SubscriptionStatus::Incomplete => SubscriptionStatus::Incomplete,
        stripe::SubscriptionStatus::IncompleteExpired => SubscriptionStatus::IncompleteExpired,
        stripe::SubscriptionStatus::Canceled => SubscriptionStatus::Canceled,
        stripe::SubscriptionStatus::Unpaid => SubscriptionStatus::Unpaid,
        stripe::SubscriptionStatus::Paused => SubscriptionStatus::Paused,
    }
}

pub fn payment_method(pm: stripe::PaymentMethod) -> PaymentMethod {
    PaymentMethod {
        id: pm.id.to_string(),
        kind: pm.type_.to_string(),
        customer: pm.customer.map(|c| c.id().to_string()),
        card: pm.card.map(|card| CardDetails {
            brand: card.brand,
            last4: card.last4,
            exp_month: card.exp_month,
            exp_year: card.exp_year,
        }),
    }
}

pub fn setup_intent(intent: stripe::SetupIntent) -> SetupIntent {
    SetupIntent {
        id: intent.id.to_string(),
        customer: intent.customer.map(|c| c.id().to_string()),
        status: intent.status.to_string(),
        payment_method: intent.payment_method.map(|pm| pm.id().to_string()),
    }
}

/// `ResourceMissing` → `resource_missing`
pub fn snake_case(code: &str) -> String {
    let mut out = String::with_capacity(code.len() + 4);
    for (i, ch) in code.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
