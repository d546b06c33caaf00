//! The send dispatch pipeline: given a user, a message template, and a
//! channel, render content, resolve a service provider, make exactly one
//! outbound provider call, and produce a typed outcome.
//!
//! Permanent outcomes (success, skip, configuration error, provider reject)
//! are returned as values; only transient infrastructure conditions surface
//! as [`DispatchError::Retryable`], which an external retry driver is
//! expected to re-run unchanged.

mod attachments;
mod clients;
mod email;
mod models;
mod record;
mod resolve;
mod sms;
mod unsubscribe;
mod webhook;

#[cfg(test)]
pub(crate) mod tests_support;

use std::sync::Arc;

use peregrine_core::{
    Channel, DispatchConfig, EmailProviderType, MessageTags, SendResult, SmsProviderType,
    SubscriptionGroupDetails, UserPropertyAssignments,
};
use peregrine_core::stores::{
    BlobStore, OauthTokenStore, ProviderStore, SecretStore, TemplateStore, WorkspaceStore,
};
use peregrine_render::Renderer;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

pub use clients::{
    EmailApi, EmailApiError, EmailAttachment, EmailCredentials, EmailPayload, HttpEmailApi,
    HttpSmsApi, HttpWebhookApi, SmsApi, SmsApiError, SmsCredentials, SmsPayload, WebhookApi,
    WebhookApiError, WebhookRequest,
};
pub use record::{record_send_outcome, send_to_many, Recipient};
pub use unsubscribe::{construct_unsubscribe_headers, UnsubscribeContext};

/// Transient or out-of-scope conditions. `Retryable` is the typed "thrown"
/// channel: the same call should be retried unchanged by the caller's retry
/// driver. Permanent failures never travel this way.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("transient dispatch failure: {0}")]
    Retryable(#[source] anyhow::Error),
    #[error("channel {0:?} is not implemented")]
    Unimplemented(Channel),
}

impl DispatchError {
    pub(crate) fn retryable(err: impl Into<anyhow::Error>) -> Self {
        DispatchError::Retryable(err.into())
    }
}

pub(crate) fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Parameters for one send. Provider overrides apply to their own channel
/// only; `occupant_id` identifies the workspace member whose OAuth tokens
/// back per-occupant providers such as Gmail.
#[derive(Debug, Clone)]
pub struct SendMessageParams {
    pub workspace_id: Uuid,
    pub user_id: String,
    pub anonymous: bool,
    pub channel: Channel,
    pub template_id: String,
    pub user_property_assignments: UserPropertyAssignments,
    pub subscription_group_details: Option<SubscriptionGroupDetails>,
    pub tags: MessageTags,
    pub use_draft: bool,
    pub email_provider_override: Option<EmailProviderType>,
    pub sms_provider_override: Option<SmsProviderType>,
    pub occupant_id: Option<String>,
}

/// External collaborators the pipeline reads from.
pub struct DispatchStores {
    pub templates: Arc<dyn TemplateStore>,
    pub providers: Arc<dyn ProviderStore>,
    pub workspaces: Arc<dyn WorkspaceStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub tokens: Arc<dyn OauthTokenStore>,
    pub blobs: Arc<dyn BlobStore>,
}

pub struct Dispatcher {
    pub(crate) stores: DispatchStores,
    pub(crate) email_api: Arc<dyn EmailApi>,
    pub(crate) sms_api: Arc<dyn SmsApi>,
    pub(crate) webhook_api: Arc<dyn WebhookApi>,
    pub(crate) renderer: Renderer,
    pub(crate) config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        stores: DispatchStores,
        email_api: Arc<dyn EmailApi>,
        sms_api: Arc<dyn SmsApi>,
        webhook_api: Arc<dyn WebhookApi>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            stores,
            email_api,
            sms_api,
            webhook_api,
            renderer: Renderer::new(),
            config,
        }
    }

    /// Dispatches one message. Every path returns a typed result; only
    /// transient conditions surface as `Err`.
    pub async fn send_message(
        &self,
        params: &SendMessageParams,
    ) -> Result<SendResult, DispatchError> {
        match params.channel {
            Channel::Email => email::send_email(self, params).await,
            Channel::Sms => sms::send_sms(self, params).await,
            Channel::Webhook => webhook::send_webhook(self, params).await,
            Channel::MobilePush => Err(DispatchError::Unimplemented(Channel::MobilePush)),
        }
    }
}
