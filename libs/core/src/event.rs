use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Event names written to (and read back from) the delivery event log.
///
/// `MessageSent` is the origin sentinel; the `Email*`/`Sms*` names are the
/// downstream status events reported by provider webhooks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum InternalEvent {
    MessageSent,
    MessageSkipped,
    MessageFailure,
    BadWorkspaceConfiguration,
    EmailDropped,
    EmailDelivered,
    EmailOpened,
    EmailClicked,
    EmailBounced,
    EmailMarkedSpam,
    SmsDelivered,
    SmsFailed,
}

impl InternalEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            InternalEvent::MessageSent => "MessageSent",
            InternalEvent::MessageSkipped => "MessageSkipped",
            InternalEvent::MessageFailure => "MessageFailure",
            InternalEvent::BadWorkspaceConfiguration => "BadWorkspaceConfiguration",
            InternalEvent::EmailDropped => "EmailDropped",
            InternalEvent::EmailDelivered => "EmailDelivered",
            InternalEvent::EmailOpened => "EmailOpened",
            InternalEvent::EmailClicked => "EmailClicked",
            InternalEvent::EmailBounced => "EmailBounced",
            InternalEvent::EmailMarkedSpam => "EmailMarkedSpam",
            InternalEvent::SmsDelivered => "SmsDelivered",
            InternalEvent::SmsFailed => "SmsFailed",
        }
    }
}

/// Status events that update an existing delivery, in no particular order.
pub const EMAIL_EVENT_LIST: &[InternalEvent] = &[
    InternalEvent::EmailDropped,
    InternalEvent::EmailDelivered,
    InternalEvent::EmailOpened,
    InternalEvent::EmailClicked,
    InternalEvent::EmailBounced,
    InternalEvent::EmailMarkedSpam,
];

pub const SMS_EVENT_LIST: &[InternalEvent] =
    &[InternalEvent::SmsDelivered, InternalEvent::SmsFailed];

/// Every status event name, for the latest-status aggregate.
pub fn status_event_names() -> Vec<&'static str> {
    EMAIL_EVENT_LIST
        .iter()
        .chain(SMS_EVENT_LIST.iter())
        .map(InternalEvent::as_str)
        .collect()
}

/// One append-only, immutable row of the delivery event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryEvent {
    pub workspace_id: Uuid,
    pub user_or_anonymous_id: String,
    #[serde(default)]
    pub anonymous: bool,
    pub event: String,
    /// Unix milliseconds at which the event occurred.
    pub event_time: i64,
    /// Unix milliseconds at which the event was ingested.
    pub processing_time: i64,
    /// Caller-supplied idempotency key; for origin sends this is also the
    /// correlation key status events refer back to.
    pub message_id: String,
    /// Hidden sends are excluded from delivery search.
    #[serde(default)]
    pub hidden: bool,
    pub properties: Value,
}

/// Caller-supplied correlation tags recorded with each outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageTags {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journey_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<Uuid>,
    /// The upstream event whose occurrence caused this send.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggering_message_id: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// Capability for appending events to the log. Dispatch treats appends as
/// fire-and-forget; ordering across events in one call is not guaranteed.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn append_events(
        &self,
        workspace_id: Uuid,
        events: Vec<DeliveryEvent>,
    ) -> anyhow::Result<()>;
}

pub type SharedEventSink = Arc<dyn EventSink>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_names_cover_both_channels() {
        let names = status_event_names();
        assert!(names.contains(&"EmailOpened"));
        assert!(names.contains(&"SmsFailed"));
        assert!(!names.contains(&"MessageSent"));
    }

    #[test]
    fn tags_flatten_extra_fields() {
        let mut tags = MessageTags {
            message_id: "m-1".into(),
            ..Default::default()
        };
        tags.extra.insert("campaign".into(), "spring".into());
        let value = serde_json::to_value(&tags).unwrap();
        assert_eq!(value["messageId"], "m-1");
        assert_eq!(value["campaign"], "spring");
    }
}
