//! Parses one joined search row into a delivery. The event log holds three
//! historical payload shapes, so channel and recipient resolution walk a
//! fallback chain; a row that still fails validation is dropped individually
//! and never fails the page.

use peregrine_core::Channel;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One row as projected by the search query, before payload validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawDeliveryRow {
    pub origin_message_id: String,
    pub user_id: String,
    #[serde(default)]
    pub anonymous: i64,
    pub sent_at: i64,
    pub updated_at: i64,
    pub status: String,
    pub properties: String,
}

/// A derived delivery: one origin send joined with its latest status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryItem {
    pub origin_message_id: String,
    pub user_id: String,
    pub is_anonymous: bool,
    /// Unix ms.
    pub sent_at: i64,
    pub updated_at: i64,
    /// Latest status event name, or `MessageSent` when no status arrived.
    pub status: String,
    pub channel: Channel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journey_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggering_message_id: Option<String>,
    /// Channel-specific payload echoed by the dispatcher, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<Value>,
}

#[derive(Debug, Error)]
pub enum RowParseError {
    #[error("properties is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("properties is not a JSON object")]
    NotAnObject,
    #[error("unrecognized channel {0:?}")]
    UnrecognizedChannel(String),
}

fn string_field(map: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// `channel` -> `messageType` -> `type` -> default Email, covering the three
/// historical payload shapes.
fn resolve_channel(map: &serde_json::Map<String, Value>) -> Result<Channel, RowParseError> {
    for key in ["channel", "messageType", "type"] {
        if let Some(raw) = string_field(map, key) {
            return Channel::from_str_loose(&raw)
                .ok_or(RowParseError::UnrecognizedChannel(raw));
        }
    }
    Ok(Channel::Email)
}

pub fn parse_delivery_row(raw: RawDeliveryRow) -> Result<DeliveryItem, RowParseError> {
    let properties: Value = serde_json::from_str(&raw.properties)?;
    let Value::Object(map) = properties else {
        return Err(RowParseError::NotAnObject);
    };

    let channel = resolve_channel(&map)?;
    let variant = map.get("variant").cloned();
    let variant_field = |key: &str| match &variant {
        Some(Value::Object(v)) => string_field(v, key),
        _ => None,
    };

    // `to` predates `variant`; the oldest rows spelled it `email`.
    let to = variant_field("to")
        .or_else(|| string_field(&map, "to"))
        .or_else(|| string_field(&map, "email"));
    let from = variant_field("from").or_else(|| string_field(&map, "from"));

    Ok(DeliveryItem {
        origin_message_id: raw.origin_message_id,
        user_id: raw.user_id,
        is_anonymous: raw.anonymous != 0,
        sent_at: raw.sent_at,
        updated_at: raw.updated_at,
        status: raw.status,
        channel,
        to,
        from,
        journey_id: string_field(&map, "journeyId"),
        broadcast_id: string_field(&map, "broadcastId"),
        template_id: string_field(&map, "templateId"),
        triggering_message_id: string_field(&map, "triggeringMessageId"),
        variant,
    })
}
