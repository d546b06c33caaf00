//! The shared success/failure/skip vocabulary every channel dispatcher
//! produces. This union is the only artifact persisted to the event log,
//! which keeps the log self-describing for later search and analytics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::InternalEvent;
use crate::subscription::{SubscriptionChange, SubscriptionGroupType};

/// Outcome of one dispatch: a permanent, typed result. Transient conditions
/// (network errors, 5xx, rate limits) are never encoded here; they travel on
/// a separate retryable error channel.
pub type SendResult = Result<MessageSendSuccess, MessageSendFailure>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageSendSuccess {
    pub variant: MessageSentVariant,
}

/// Permanent non-success outcomes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "variant")]
pub enum MessageSendFailure {
    BadWorkspaceConfiguration(BadWorkspaceConfigurationVariant),
    MessageFailure(MessageFailureVariant),
    MessageSkipped(MessageSkippedVariant),
}

impl MessageSendFailure {
    pub fn kind(&self) -> InternalEvent {
        match self {
            MessageSendFailure::BadWorkspaceConfiguration(_) => {
                InternalEvent::BadWorkspaceConfiguration
            }
            MessageSendFailure::MessageFailure(_) => InternalEvent::MessageFailure,
            MessageSendFailure::MessageSkipped(_) => InternalEvent::MessageSkipped,
        }
    }
}

/// Channel-discriminated success payload. Echoes enough rendered content to
/// reconstruct a human-readable delivery later; attachment bytes are never
/// echoed, only name and mime type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum MessageSentVariant {
    Email(EmailMessageSent),
    Sms(SmsMessageSent),
    Webhook(WebhookMessageSent),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessageSent {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcc: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentEcho>,
    pub provider: EmailProviderReceipt,
}

/// Attachment echoed by name and mime type only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentEcho {
    pub name: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum EmailProviderReceipt {
    Sendgrid {},
    Gmail {
        #[serde(rename = "messageId", default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    Test {},
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SmsMessageSent {
    pub to: String,
    pub body: String,
    pub provider: SmsProviderReceipt,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SmsProviderReceipt {
    Twilio {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sid: Option<String>,
    },
    Test {},
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookMessageSent {
    pub to: String,
    /// The request as sent, with secret-half values excluded.
    pub request: WebhookRequestEcho,
    pub response: WebhookResponsePayload,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRequestEcho {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// Response body of any shape, preserved opaquely for audit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponsePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Actionable, workspace-owner-visible configuration problems. Permanent;
/// never retried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum BadWorkspaceConfigurationVariant {
    MessageTemplateNotFound,
    MessageTemplateMisconfigured {
        message: String,
    },
    MessageTemplateRenderError {
        field: String,
        error: String,
    },
    MessageServiceProviderNotFound,
    MessageServiceProviderMisconfigured {
        message: String,
    },
}

/// The provider itself rejected the message. Permanent from this core's
/// perspective; recorded for analytics and suppression decisions elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum MessageFailureVariant {
    Email {
        provider: EmailProviderFailure,
    },
    Sms {
        provider: SmsProviderFailure,
    },
    Webhook {
        response: WebhookResponsePayload,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum EmailProviderFailure {
    Sendgrid {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },
    Gmail {
        message: String,
    },
    Test {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SmsProviderFailure {
    Twilio { message: String },
    Test { message: String },
}

/// Expected, non-error no-ops. Always recorded, never logged as errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum MessageSkippedVariant {
    SubscriptionState {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<SubscriptionChange>,
        #[serde(rename = "subscriptionGroupType")]
        subscription_group_type: SubscriptionGroupType,
    },
    MissingIdentifier {
        #[serde(rename = "identifierKey")]
        identifier_key: String,
    },
}

/// The flat union persisted to the event log: the event name is the outcome
/// kind, the `variant` lands in the event properties.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    MessageSent(MessageSentVariant),
    MessageSkipped(MessageSkippedVariant),
    BadWorkspaceConfiguration(BadWorkspaceConfigurationVariant),
    MessageFailure(MessageFailureVariant),
}

impl SendOutcome {
    pub fn kind(&self) -> InternalEvent {
        match self {
            SendOutcome::MessageSent(_) => InternalEvent::MessageSent,
            SendOutcome::MessageSkipped(_) => InternalEvent::MessageSkipped,
            SendOutcome::BadWorkspaceConfiguration(_) => InternalEvent::BadWorkspaceConfiguration,
            SendOutcome::MessageFailure(_) => InternalEvent::MessageFailure,
        }
    }

    /// The channel/provider-discriminated payload serialized for the event
    /// log's `properties.variant`.
    pub fn variant_json(&self) -> Value {
        match self {
            SendOutcome::MessageSent(v) => serde_json::to_value(v),
            SendOutcome::MessageSkipped(v) => serde_json::to_value(v),
            SendOutcome::BadWorkspaceConfiguration(v) => serde_json::to_value(v),
            SendOutcome::MessageFailure(v) => serde_json::to_value(v),
        }
        .unwrap_or(Value::Null)
    }
}

impl From<SendResult> for SendOutcome {
    fn from(result: SendResult) -> Self {
        match result {
            Ok(success) => SendOutcome::MessageSent(success.variant),
            Err(MessageSendFailure::BadWorkspaceConfiguration(v)) => {
                SendOutcome::BadWorkspaceConfiguration(v)
            }
            Err(MessageSendFailure::MessageFailure(v)) => SendOutcome::MessageFailure(v),
            Err(MessageSendFailure::MessageSkipped(v)) => SendOutcome::MessageSkipped(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sent_variant_serializes_with_channel_tag() {
        let variant = MessageSentVariant::Sms(SmsMessageSent {
            to: "15551234567".into(),
            body: "hello".into(),
            provider: SmsProviderReceipt::Test {},
        });
        let value = serde_json::to_value(&variant).unwrap();
        assert_eq!(value["type"], "Sms");
        assert_eq!(value["provider"]["type"], "Test");
    }

    #[test]
    fn skip_variant_carries_identifier_key() {
        let variant = MessageSkippedVariant::MissingIdentifier {
            identifier_key: "deviceToken".into(),
        };
        assert_eq!(
            serde_json::to_value(&variant).unwrap(),
            json!({"type": "MissingIdentifier", "identifierKey": "deviceToken"})
        );
    }

    #[test]
    fn outcome_kind_tracks_result_shape() {
        let ok_outcome: SendOutcome = Ok(MessageSendSuccess {
            variant: MessageSentVariant::Sms(SmsMessageSent {
                to: "1".into(),
                body: "b".into(),
                provider: SmsProviderReceipt::Test {},
            }),
        })
        .into();
        assert_eq!(ok_outcome.kind(), InternalEvent::MessageSent);

        let err_outcome: SendOutcome = Err(MessageSendFailure::MessageSkipped(
            MessageSkippedVariant::MissingIdentifier {
                identifier_key: "email".into(),
            },
        ))
        .into();
        assert_eq!(err_outcome.kind(), InternalEvent::MessageSkipped);
    }
}
