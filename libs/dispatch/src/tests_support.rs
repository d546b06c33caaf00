//! Shared fixture for dispatcher unit tests: in-memory stores plus recording
//! provider mocks wired into a real `Dispatcher`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use peregrine_core::outcome::{
    EmailProviderReceipt, SmsProviderReceipt, WebhookResponsePayload,
};
use peregrine_core::stores::{
    InMemoryBlobStore, InMemoryProviderStore, InMemorySecretStore, InMemoryTemplateStore,
    InMemoryWorkspaceStore, OauthTokenStore,
};
use peregrine_core::{Channel, DispatchConfig, OauthToken};
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::clients::{
    EmailApi, EmailApiError, EmailCredentials, EmailPayload, SmsApi, SmsApiError, SmsCredentials,
    SmsPayload, WebhookApi, WebhookApiError, WebhookRequest,
};
use crate::{DispatchStores, Dispatcher, SendMessageParams};

#[derive(Default)]
pub(crate) struct MockEmailApi {
    pub calls: Mutex<Vec<(EmailCredentials, EmailPayload)>>,
    /// Consumed on the next call; `None` means succeed.
    pub fail_next: Mutex<Option<EmailApiError>>,
}

impl MockEmailApi {
    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    pub async fn last_payload(&self) -> EmailPayload {
        self.calls
            .lock()
            .await
            .last()
            .map(|(_, p)| p.clone())
            .unwrap()
    }
}

#[async_trait]
impl EmailApi for MockEmailApi {
    async fn send(
        &self,
        credentials: &EmailCredentials,
        payload: &EmailPayload,
    ) -> Result<EmailProviderReceipt, EmailApiError> {
        self.calls
            .lock()
            .await
            .push((credentials.clone(), payload.clone()));
        if let Some(err) = self.fail_next.lock().await.take() {
            return Err(err);
        }
        Ok(match credentials {
            EmailCredentials::Sendgrid { .. } => EmailProviderReceipt::Sendgrid {},
            EmailCredentials::Gmail { .. } => EmailProviderReceipt::Gmail {
                message_id: Some("gm-1".into()),
            },
            EmailCredentials::Test => EmailProviderReceipt::Test {},
        })
    }
}

#[derive(Default)]
pub(crate) struct MockSmsApi {
    pub calls: Mutex<Vec<(SmsCredentials, SmsPayload)>>,
    pub fail_next: Mutex<Option<SmsApiError>>,
}

impl MockSmsApi {
    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    pub async fn last_payload(&self) -> SmsPayload {
        self.calls
            .lock()
            .await
            .last()
            .map(|(_, p)| p.clone())
            .unwrap()
    }
}

#[async_trait]
impl SmsApi for MockSmsApi {
    async fn send(
        &self,
        credentials: &SmsCredentials,
        payload: &SmsPayload,
    ) -> Result<SmsProviderReceipt, SmsApiError> {
        self.calls
            .lock()
            .await
            .push((credentials.clone(), payload.clone()));
        if let Some(err) = self.fail_next.lock().await.take() {
            return Err(err);
        }
        Ok(match credentials {
            SmsCredentials::Twilio { .. } => SmsProviderReceipt::Twilio {
                sid: Some("SM1".into()),
            },
            SmsCredentials::Test => SmsProviderReceipt::Test {},
        })
    }
}

#[derive(Default)]
pub(crate) struct MockWebhookApi {
    pub calls: Mutex<Vec<WebhookRequest>>,
    pub fail_next: Mutex<Option<WebhookApiError>>,
}

impl MockWebhookApi {
    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    pub async fn last_request(&self) -> WebhookRequest {
        self.calls.lock().await.last().cloned().unwrap()
    }
}

#[async_trait]
impl WebhookApi for MockWebhookApi {
    async fn execute(
        &self,
        request: &WebhookRequest,
    ) -> Result<WebhookResponsePayload, WebhookApiError> {
        self.calls.lock().await.push(request.clone());
        if let Some(err) = self.fail_next.lock().await.take() {
            return Err(err);
        }
        Ok(WebhookResponsePayload {
            status: Some(200),
            headers: Default::default(),
            body: Some(json!({"ok": true})),
        })
    }
}

/// Token store whose refresh always succeeds with a fixed access token, so
/// tests can assert whether the refresh path ran.
#[derive(Default)]
pub(crate) struct MockOauthTokenStore {
    tokens: Mutex<HashMap<(Uuid, String), OauthToken>>,
    refreshes: Mutex<usize>,
}

impl MockOauthTokenStore {
    pub async fn set_token(&self, workspace_id: Uuid, occupant_id: &str, token: OauthToken) {
        self.tokens
            .lock()
            .await
            .insert((workspace_id, occupant_id.to_string()), token);
    }

    pub async fn refresh_calls(&self) -> usize {
        *self.refreshes.lock().await
    }
}

#[async_trait]
impl OauthTokenStore for MockOauthTokenStore {
    async fn get_token(
        &self,
        workspace_id: Uuid,
        occupant_id: &str,
    ) -> anyhow::Result<Option<OauthToken>> {
        Ok(self
            .tokens
            .lock()
            .await
            .get(&(workspace_id, occupant_id.to_string()))
            .cloned())
    }

    async fn refresh_token(
        &self,
        workspace_id: Uuid,
        occupant_id: &str,
    ) -> anyhow::Result<Option<OauthToken>> {
        *self.refreshes.lock().await += 1;
        let key = (workspace_id, occupant_id.to_string());
        let mut tokens = self.tokens.lock().await;
        let Some(token) = tokens.get_mut(&key) else {
            return Ok(None);
        };
        token.access_token = "refreshed".to_string();
        token.expires_at += 3_600_000;
        Ok(Some(token.clone()))
    }
}

pub(crate) struct Fixture {
    pub workspace_id: Uuid,
    pub templates: Arc<InMemoryTemplateStore>,
    pub providers: Arc<InMemoryProviderStore>,
    pub workspaces: Arc<InMemoryWorkspaceStore>,
    pub secrets: Arc<InMemorySecretStore>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub tokens: Arc<MockOauthTokenStore>,
    pub email_api: Arc<MockEmailApi>,
    pub sms_api: Arc<MockSmsApi>,
    pub webhook_api: Arc<MockWebhookApi>,
    pub dispatcher: Dispatcher,
}

pub(crate) async fn dispatcher_fixture() -> Fixture {
    let templates = Arc::new(InMemoryTemplateStore::new());
    let providers = Arc::new(InMemoryProviderStore::new());
    let workspaces = Arc::new(InMemoryWorkspaceStore::new());
    let secrets = Arc::new(InMemorySecretStore::new());
    let blobs = Arc::new(InMemoryBlobStore::new());
    let tokens = Arc::new(MockOauthTokenStore::default());
    let email_api = Arc::new(MockEmailApi::default());
    let sms_api = Arc::new(MockSmsApi::default());
    let webhook_api = Arc::new(MockWebhookApi::default());

    let stores = DispatchStores {
        templates: templates.clone(),
        providers: providers.clone(),
        workspaces: workspaces.clone(),
        secrets: secrets.clone(),
        tokens: tokens.clone(),
        blobs: blobs.clone(),
    };
    let dispatcher = Dispatcher::new(
        stores,
        email_api.clone(),
        sms_api.clone(),
        webhook_api.clone(),
        DispatchConfig::default(),
    );

    Fixture {
        workspace_id: Uuid::new_v4(),
        templates,
        providers,
        workspaces,
        secrets,
        blobs,
        tokens,
        email_api,
        sms_api,
        webhook_api,
        dispatcher,
    }
}

/// Baseline SMS-channel params against the fixture workspace.
pub(crate) fn sms_params(fixture: &Fixture) -> SendMessageParams {
    SendMessageParams {
        workspace_id: fixture.workspace_id,
        user_id: "u-1".into(),
        anonymous: false,
        channel: Channel::Sms,
        template_id: Uuid::new_v4().to_string(),
        user_property_assignments: Default::default(),
        subscription_group_details: None,
        tags: Default::default(),
        use_draft: false,
        email_provider_override: None,
        sms_provider_override: None,
        occupant_id: None,
    }
}
