//! Outcome recording: every terminal send result is appended to the delivery
//! event log keyed by the caller's message id. Recording is best-effort; a
//! log append failure is logged and never turns a completed send into an
//! error.

use std::collections::BTreeMap;

use futures::stream::{self, StreamExt};
use peregrine_core::{
    DeliveryEvent, SendOutcome, SendResult, SharedEventSink, SubscriptionGroupDetails,
    UserPropertyAssignments,
};
use serde_json::Value;
use tracing::warn;

use crate::{now_ms, DispatchError, Dispatcher, SendMessageParams};

/// Message tags as flat strings for template render contexts and provider
/// custom args.
pub(crate) fn tag_map(params: &SendMessageParams) -> BTreeMap<String, String> {
    let Ok(Value::Object(map)) = serde_json::to_value(&params.tags) else {
        return BTreeMap::new();
    };
    map.into_iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (key, rendered)
        })
        .collect()
}

/// Appends the outcome of one send to the event log. The event name is the
/// outcome kind; the tags and the channel/provider variant land in the event
/// properties so search can reconstruct the delivery.
pub async fn record_send_outcome(
    sink: &SharedEventSink,
    params: &SendMessageParams,
    result: &SendResult,
) {
    let outcome: SendOutcome = result.clone().into();
    let kind = outcome.kind();
    peregrine_telemetry::record_send_outcome(kind.as_str(), params.channel.as_str());

    let mut properties = match serde_json::to_value(&params.tags) {
        Ok(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    properties.insert(
        "channel".to_string(),
        Value::String(params.channel.as_str().to_string()),
    );
    properties.insert("variant".to_string(), outcome.variant_json());

    let now = now_ms();
    let event = DeliveryEvent {
        workspace_id: params.workspace_id,
        user_or_anonymous_id: params.user_id.clone(),
        anonymous: params.anonymous,
        event: kind.as_str().to_string(),
        event_time: now,
        processing_time: now,
        message_id: params.tags.message_id.clone(),
        hidden: false,
        properties: Value::Object(properties),
    };

    if let Err(err) = sink.append_events(params.workspace_id, vec![event]).await {
        warn!(
            workspace_id = %params.workspace_id,
            message_id = %params.tags.message_id,
            error = %err,
            "failed to record send outcome"
        );
    }
}

/// One recipient of a fan-out send.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub user_id: String,
    /// Idempotency key for this recipient's delivery.
    pub message_id: String,
    pub user_property_assignments: UserPropertyAssignments,
    pub subscription_group_details: Option<SubscriptionGroupDetails>,
}

/// Dispatches the same template to many recipients with bounded concurrency,
/// recording each outcome. Results come back in recipient order; a retryable
/// error for one recipient does not stop the rest.
pub async fn send_to_many(
    dispatcher: &Dispatcher,
    sink: &SharedEventSink,
    base: &SendMessageParams,
    recipients: Vec<Recipient>,
    concurrency: usize,
) -> Vec<Result<SendResult, DispatchError>> {
    stream::iter(recipients)
        .map(|recipient| async move {
            let mut params = base.clone();
            params.user_id = recipient.user_id;
            params.user_property_assignments = recipient.user_property_assignments;
            params.subscription_group_details = recipient.subscription_group_details;
            params.tags.message_id = recipient.message_id;

            let result = dispatcher.send_message(&params).await;
            if let Ok(send_result) = &result {
                record_send_outcome(sink, &params, send_result).await;
            }
            result
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}
