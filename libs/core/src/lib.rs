//! Core types for the Peregrine messaging runtime: channels, message
//! templates, provider credentials, the send-outcome taxonomy, delivery
//! events, and the store traits that back the dispatch and search engines.

pub mod channel;
pub mod config;
pub mod event;
pub mod outcome;
pub mod provider;
pub mod stores;
pub mod subscription;
pub mod template;
pub mod user_properties;

pub use channel::Channel;
pub use config::DispatchConfig;
pub use event::{
    DeliveryEvent, EventSink, InternalEvent, MessageTags, SharedEventSink, EMAIL_EVENT_LIST,
    SMS_EVENT_LIST,
};
pub use outcome::{
    BadWorkspaceConfigurationVariant, MessageFailureVariant, MessageSendFailure,
    MessageSendSuccess, MessageSentVariant, MessageSkippedVariant, SendOutcome, SendResult,
};
pub use provider::{
    EmailProviderRow, EmailProviderSecret, EmailProviderType, OauthToken, SmsProviderRow,
    SmsProviderSecret, SmsProviderType,
};
pub use stores::{
    BlobObject, BlobStore, MessageTemplateRow, OauthTokenStore, ProviderStore, SecretStore,
    TemplateStore, WorkspaceStore,
};
pub use subscription::{
    in_subscription_group, SubscriptionChange, SubscriptionGroupDetails, SubscriptionGroupType,
};
pub use template::{
    enrich_message_template, AttachmentRef, EmailHeader, EmailTemplate, MessageTemplateResource,
    MobilePushTemplate, SmsTemplate, TemplateDefinition, WebhookConfigTemplate, WebhookTemplate,
};
pub use user_properties::{identifier_for, UserPropertyAssignments};

/// Secret name under which a workspace's subscription-management signing key
/// is stored.
pub const SUBSCRIPTION_SECRET_NAME: &str = "subscription-secret";

/// Secret name holding the workspace's private webhook values (a JSON object
/// of string fields merged into the render context).
pub const WEBHOOK_SECRET_NAME: &str = "webhook-config";

/// Header attached to outbound webhook requests carrying the message id.
pub const MESSAGE_ID_HEADER: &str = "x-peregrine-message-id";
