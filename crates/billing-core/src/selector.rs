//! Subscription Selection
//!
//! Picks the one subscription that represents a user's plan out of
//! everything a billing customer has. Rules are tried in order; each rule
//! is a full pass over the list and the first hit wins.
//!
//! | # | rule                                  |
//! |---|---------------------------------------|
//! | 1 | valid status and metadata names user  |
//! | 2 | metadata names user                   |
//! | 3 | valid status                          |
//! | 4 | anything (first in provider order)    |

use crate::error::{BillingError, Result};
use crate::model::{BillingSubscription, UserId};

/// A selection rule, in priority order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionRule {
    ValidAndOwned,
    Owned,
    Valid,
    Any,
}

impl SelectionRule {
    /// Evaluation order
    pub const ORDER: [Self; 4] = [Self::ValidAndOwned, Self::Owned, Self::Valid, Self::Any];

    pub fn matches(self, subscription: &BillingSubscription, user_id: UserId) -> bool {
        match self {
            Self::ValidAndOwned => {
                subscription.status.is_valid() && subscription.belongs_to(user_id)
            }
            Self::Owned => subscription.belongs_to(user_id),
            Self::Valid => subscription.status.is_valid(),
            Self::Any => true,
        }
    }

    /// Rule number as listed in the module table
    pub fn rank(self) -> u8 {
        match self {
            Self::ValidAndOwned => 1,
            Self::Owned => 2,
            Self::Valid => 3,
            Self::Any => 4,
        }
    }

    /// First subscription satisfying this rule
    pub fn find(
        self,
        subscriptions: &[BillingSubscription],
        user_id: UserId,
    ) -> Option<&BillingSubscription> {
        subscriptions.iter().find(|s| self.matches(s, user_id))
    }
}

/// A chosen subscription and the rule that chose it
#[derive(Clone, Copy, Debug)]
pub struct Selection<'a> {
    pub subscription: &'a BillingSubscription,
    pub rule: SelectionRule,
}

/// Choose the subscription for `user_id`; `NotFound` only for an empty list.
pub fn select_subscription(
    subscriptions: &[BillingSubscription],
    user_id: UserId,
) -> Result<Selection<'_>> {
    SelectionRule::ORDER
        .into_iter()
        .find_map(|rule| {
            rule.find(subscriptions, user_id)
                .map(|subscription| Selection { subscription, rule })
        })
        .ok_or_else(|| BillingError::not_found("Subscription"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SubscriptionStatus::{Active, Canceled, PastDue, Unpaid};

    fn sub(
        id: &str,
        status: crate::model::SubscriptionStatus,
        owner: Option<UserId>,
    ) -> BillingSubscription {
        let s = BillingSubscription::new(id, "cus_1", status);
        match owner {
            Some(user_id) => s.with_local_user(user_id),
            None => s,
        }
    }

    #[test]
    fn test_empty_list_is_not_found() {
        assert!(matches!(select_subscription(&[], 1), Err(BillingError::NotFound(_))));
    }

    #[test]
    fn test_valid_and_owned_wins_regardless_of_position() {
        let subs = vec![
            sub("sub_a", Active, None),
            sub("sub_b", Canceled, Some(1)),
            sub("sub_c", PastDue, Some(1)),
        ];
        let selection = select_subscription(&subs, 1).unwrap();
        assert_eq!(selection.subscription.id, "sub_c");
        assert_eq!(selection.rule, SelectionRule::ValidAndOwned);
    }

    #[test]
    fn test_owned_but_canceled_beats_active_unowned() {
        let subs = vec![sub("sub_active", Active, None), sub("sub_mine", Canceled, Some(1))];
        let selection = select_subscription(&subs, 1).unwrap();
        assert_eq!(selection.subscription.id, "sub_mine");
        assert_eq!(selection.rule.rank(), 2);
    }

    #[test]
    fn test_valid_status_beats_first() {
        let subs = vec![sub("sub_old", Unpaid, Some(2)), sub("sub_live", Active, Some(2))];
        let selection = select_subscription(&subs, 1).unwrap();
        assert_eq!(selection.subscription.id, "sub_live");
        assert_eq!(selection.rule, SelectionRule::Valid);
    }

    #[test]
    fn test_falls_back_to_first() {
        let subs = vec![sub("sub_x", Canceled, None), sub("sub_y", Unpaid, Some(9))];
        let selection = select_subscription(&subs, 1).unwrap();
        assert_eq!(selection.subscription.id, "sub_x");
        assert_eq!(selection.rule, SelectionRule::Any);
    }
}
