//! Read-only store contracts consumed by the dispatch pipeline. Templates,
//! providers, secrets, and workspaces are owned by out-of-scope CRUD; this
//! core only reads them. In-memory implementations back the test suites and
//! small embedded deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::provider::{EmailProviderRow, EmailProviderType, OauthToken, SmsProviderRow, SmsProviderType};

/// A stored message template before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageTemplateRow {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub definition: Option<Value>,
    pub draft: Option<Value>,
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn find_template(&self, id: Uuid) -> anyhow::Result<Option<MessageTemplateRow>>;
}

/// Provider lookup. `provider: None` resolves the workspace's default
/// provider for the channel.
#[async_trait]
pub trait ProviderStore: Send + Sync {
    async fn email_provider(
        &self,
        workspace_id: Uuid,
        provider: Option<EmailProviderType>,
    ) -> anyhow::Result<Option<EmailProviderRow>>;

    async fn sms_provider(
        &self,
        workspace_id: Uuid,
        provider: Option<SmsProviderType>,
    ) -> anyhow::Result<Option<SmsProviderRow>>;
}

#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// The workspace's parent, if any. Providers absent at a child workspace
    /// may be inherited from exactly one parent (no multi-level chains).
    async fn parent_workspace(&self, workspace_id: Uuid) -> anyhow::Result<Option<Uuid>>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn secret_value(&self, workspace_id: Uuid, name: &str) -> anyhow::Result<Option<String>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlobObject {
    pub data: Vec<u8>,
    pub mime_type: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get_object(&self, key: &str) -> anyhow::Result<Option<BlobObject>>;
}

/// Per-occupant OAuth tokens for providers that are not workspace-wide.
#[async_trait]
pub trait OauthTokenStore: Send + Sync {
    async fn get_token(
        &self,
        workspace_id: Uuid,
        occupant_id: &str,
    ) -> anyhow::Result<Option<OauthToken>>;

    /// Exchanges the refresh token for a fresh access token and persists it.
    async fn refresh_token(
        &self,
        workspace_id: Uuid,
        occupant_id: &str,
    ) -> anyhow::Result<Option<OauthToken>>;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct InMemoryTemplateStore {
    inner: Arc<RwLock<HashMap<Uuid, MessageTemplateRow>>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, row: MessageTemplateRow) {
        self.inner.write().await.insert(row.id, row);
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn find_template(&self, id: Uuid) -> anyhow::Result<Option<MessageTemplateRow>> {
        Ok(self.inner.read().await.get(&id).cloned())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryProviderStore {
    email: Arc<RwLock<HashMap<(Uuid, Option<EmailProviderType>), EmailProviderRow>>>,
    sms: Arc<RwLock<HashMap<(Uuid, Option<SmsProviderType>), SmsProviderRow>>>,
}

impl InMemoryProviderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an email provider; also installs it as the workspace default
    /// when `default` is set.
    pub async fn insert_email(&self, workspace_id: Uuid, row: EmailProviderRow, default: bool) {
        let mut guard = self.email.write().await;
        if default {
            guard.insert((workspace_id, None), row.clone());
        }
        guard.insert((workspace_id, Some(row.provider_type)), row);
    }

    pub async fn insert_sms(&self, workspace_id: Uuid, row: SmsProviderRow, default: bool) {
        let mut guard = self.sms.write().await;
        if default {
            guard.insert((workspace_id, None), row.clone());
        }
        guard.insert((workspace_id, Some(row.provider_type)), row);
    }
}

#[async_trait]
impl ProviderStore for InMemoryProviderStore {
    async fn email_provider(
        &self,
        workspace_id: Uuid,
        provider: Option<EmailProviderType>,
    ) -> anyhow::Result<Option<EmailProviderRow>> {
        Ok(self.email.read().await.get(&(workspace_id, provider)).cloned())
    }

    async fn sms_provider(
        &self,
        workspace_id: Uuid,
        provider: Option<SmsProviderType>,
    ) -> anyhow::Result<Option<SmsProviderRow>> {
        Ok(self.sms.read().await.get(&(workspace_id, provider)).cloned())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryWorkspaceStore {
    parents: Arc<RwLock<HashMap<Uuid, Uuid>>>,
}

impl InMemoryWorkspaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_parent(&self, child: Uuid, parent: Uuid) {
        self.parents.write().await.insert(child, parent);
    }
}

#[async_trait]
impl WorkspaceStore for InMemoryWorkspaceStore {
    async fn parent_workspace(&self, workspace_id: Uuid) -> anyhow::Result<Option<Uuid>> {
        Ok(self.parents.read().await.get(&workspace_id).copied())
    }
}

#[derive(Clone, Default)]
pub struct InMemorySecretStore {
    inner: Arc<RwLock<HashMap<(Uuid, String), String>>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, workspace_id: Uuid, name: &str, value: &str) {
        self.inner
            .write()
            .await
            .insert((workspace_id, name.to_string()), value.to_string());
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn secret_value(&self, workspace_id: Uuid, name: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .inner
            .read()
            .await
            .get(&(workspace_id, name.to_string()))
            .cloned())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryBlobStore {
    inner: Arc<RwLock<HashMap<String, BlobObject>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, key: &str, object: BlobObject) {
        self.inner.write().await.insert(key.to_string(), object);
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn get_object(&self, key: &str) -> anyhow::Result<Option<BlobObject>> {
        Ok(self.inner.read().await.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn provider_store_tracks_defaults_separately() {
        let store = InMemoryProviderStore::new();
        let workspace = Uuid::new_v4();
        store
            .insert_email(
                workspace,
                EmailProviderRow {
                    provider_type: EmailProviderType::Sendgrid,
                    secret: Some(json!({"type": "Sendgrid", "apiKey": "k"})),
                },
                true,
            )
            .await;

        let by_default = store.email_provider(workspace, None).await.unwrap();
        let by_type = store
            .email_provider(workspace, Some(EmailProviderType::Sendgrid))
            .await
            .unwrap();
        assert_eq!(by_default, by_type);
        assert!(store
            .email_provider(workspace, Some(EmailProviderType::Test))
            .await
            .unwrap()
            .is_none());
    }
}
