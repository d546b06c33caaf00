use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Email service providers a workspace can configure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EmailProviderType {
    Sendgrid,
    Gmail,
    Test,
}

impl EmailProviderType {
    /// Gmail credentials belong to an individual workspace occupant rather
    /// than the workspace itself, so the resolver goes through the OAuth
    /// token store instead of the provider table.
    pub fn is_workspace_scoped(&self) -> bool {
        !matches!(self, EmailProviderType::Gmail)
    }
}

/// SMS service providers a workspace can configure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SmsProviderType {
    Twilio,
    Test,
}

/// Stored (unvalidated) workspace email-provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmailProviderRow {
    pub provider_type: EmailProviderType,
    /// Raw secret config; validated into [`EmailProviderSecret`] at dispatch
    /// time.
    pub secret: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SmsProviderRow {
    pub provider_type: SmsProviderType,
    pub secret: Option<Value>,
}

/// Validated email-provider credential bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum EmailProviderSecret {
    Sendgrid {
        #[serde(rename = "apiKey", default, skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
    },
    Test {},
}

/// Validated SMS-provider credential bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SmsProviderSecret {
    Twilio {
        #[serde(rename = "accountSid", default, skip_serializing_if = "Option::is_none")]
        account_sid: Option<String>,
        #[serde(rename = "authToken", default, skip_serializing_if = "Option::is_none")]
        auth_token: Option<String>,
        #[serde(
            rename = "messagingServiceSid",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        messaging_service_sid: Option<String>,
    },
    Test {},
}

/// Per-occupant OAuth token as held by the token store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OauthToken {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix milliseconds.
    pub expires_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn secret_union_is_tagged_by_type() {
        let secret: EmailProviderSecret =
            serde_json::from_value(json!({"type": "Sendgrid", "apiKey": "sg-123"})).unwrap();
        assert_eq!(
            secret,
            EmailProviderSecret::Sendgrid {
                api_key: Some("sg-123".into())
            }
        );
    }

    #[test]
    fn gmail_is_not_workspace_scoped() {
        assert!(!EmailProviderType::Gmail.is_workspace_scoped());
        assert!(EmailProviderType::Sendgrid.is_workspace_scoped());
    }
}
