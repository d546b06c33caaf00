use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::channel::Channel;
use crate::stores::MessageTemplateRow;

/// Published or draft content of a message template, discriminated by
/// channel. `definition` is the published content; `draft` is a preview
/// variant that takes precedence when requested but never overwrites the
/// definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum TemplateDefinition {
    Email(EmailTemplate),
    Sms(SmsTemplate),
    MobilePush(MobilePushTemplate),
    Webhook(WebhookTemplate),
}

impl TemplateDefinition {
    pub fn channel(&self) -> Channel {
        match self {
            TemplateDefinition::Email(_) => Channel::Email,
            TemplateDefinition::Sms(_) => Channel::Sms,
            TemplateDefinition::MobilePush(_) => Channel::MobilePush,
            TemplateDefinition::Webhook(_) => Channel::Webhook,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmailTemplate {
    pub from: String,
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Display name shown alongside the from address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcc: Option<String>,
    /// Custom headers; values are template strings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<EmailHeader>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailHeader {
    pub name: String,
    pub value: String,
}

/// Reference to an attachment stored in the blob store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    /// Blob-store key holding the attachment bytes.
    pub key: String,
    /// Filename presented to the recipient.
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SmsTemplate {
    pub body: String,
}

/// Declared for completeness; the dispatch pipeline does not implement
/// mobile-push sends yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MobilePushTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Webhook templates are split into a public `config` half and a private
/// `secret` half; at dispatch time the secret half wins field-by-field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookTemplate {
    /// User-property key holding the recipient identifier for this template.
    pub identifier_key: String,
    pub config: WebhookConfigTemplate,
    #[serde(default)]
    pub secret: WebhookConfigTemplate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfigTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// JSON-encoded query params, rendered before parsing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<String>,
    /// JSON-encoded request body, rendered before parsing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// A template row with its stored JSON validated into typed definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageTemplateResource {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub definition: Option<TemplateDefinition>,
    pub draft: Option<TemplateDefinition>,
}

impl MessageTemplateResource {
    /// Content used for a send: the draft when `use_draft` and one exists,
    /// otherwise the published definition.
    pub fn content(&self, use_draft: bool) -> Option<&TemplateDefinition> {
        if use_draft {
            self.draft.as_ref().or(self.definition.as_ref())
        } else {
            self.definition.as_ref()
        }
    }
}

#[derive(Debug, Error)]
pub enum TemplateValidationError {
    #[error("template {0} has neither a draft nor a definition")]
    Empty(Uuid),
    #[error("stored template {id} content failed validation: {source}")]
    Invalid {
        id: Uuid,
        #[source]
        source: serde_json::Error,
    },
}

/// Validates a raw stored row into a typed resource. Failure here is a hard
/// configuration error, distinct from "not found".
pub fn enrich_message_template(
    row: MessageTemplateRow,
) -> Result<MessageTemplateResource, TemplateValidationError> {
    let definition = row
        .definition
        .map(serde_json::from_value::<TemplateDefinition>)
        .transpose()
        .map_err(|source| TemplateValidationError::Invalid { id: row.id, source })?;
    let draft = row
        .draft
        .map(serde_json::from_value::<TemplateDefinition>)
        .transpose()
        .map_err(|source| TemplateValidationError::Invalid { id: row.id, source })?;
    if definition.is_none() && draft.is_none() {
        return Err(TemplateValidationError::Empty(row.id));
    }
    Ok(MessageTemplateResource {
        id: row.id,
        workspace_id: row.workspace_id,
        name: row.name,
        definition,
        draft,
    })
}
