use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opt-in vs opt-out audience gate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SubscriptionGroupType {
    OptIn,
    OptOut,
}

/// The user's most recent explicit action against a subscription group, if
/// any.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SubscriptionChange {
    Subscribe,
    Unsubscribe,
}

/// Subscription group state evaluated before a send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionGroupDetails {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub group_type: SubscriptionGroupType,
    pub action: Option<SubscriptionChange>,
}

/// Whether the user is currently "in" the subscription group.
///
/// Opt-in groups require an explicit subscribe; opt-out groups include
/// everyone who has not explicitly unsubscribed.
pub fn in_subscription_group(details: &SubscriptionGroupDetails) -> bool {
    match details.group_type {
        SubscriptionGroupType::OptIn => details.action == Some(SubscriptionChange::Subscribe),
        SubscriptionGroupType::OptOut => details.action != Some(SubscriptionChange::Unsubscribe),
    }
}
