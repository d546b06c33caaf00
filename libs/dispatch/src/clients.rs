//! Provider API seams. Each channel gets one trait with a reqwest-backed
//! implementation; the traits keep the dispatchers unit-testable without a
//! network. HTTP implementations accept an `api_base` override so tests and
//! CI can point them at mocks.
//!
//! Response mapping is uniform across providers: transport errors, 5xx, and
//! 429 are retryable; structured rejects (other non-2xx) become typed
//! provider failures.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use peregrine_core::outcome::{
    EmailProviderFailure, EmailProviderReceipt, SmsProviderFailure, SmsProviderReceipt,
    WebhookResponsePayload,
};
use reqwest::StatusCode;
use serde_json::{json, Value};

/// Whether a provider HTTP status should be retried unchanged.
fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

// ---------------------------------------------------------------------------
// Email
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum EmailCredentials {
    Sendgrid { api_key: String },
    Gmail { access_token: String },
    Test,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailAttachment {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmailPayload {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub reply_to: Option<String>,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub attachments: Vec<EmailAttachment>,
    /// Correlation tags echoed back by provider webhooks.
    pub custom_args: BTreeMap<String, String>,
}

#[derive(Debug)]
pub enum EmailApiError {
    /// The provider rejected the message; permanent.
    Rejected(EmailProviderFailure),
    /// Transport failure, 5xx, or rate limit; retry the same call.
    Retryable(anyhow::Error),
}

#[async_trait]
pub trait EmailApi: Send + Sync {
    async fn send(
        &self,
        credentials: &EmailCredentials,
        payload: &EmailPayload,
    ) -> Result<EmailProviderReceipt, EmailApiError>;
}

pub struct HttpEmailApi {
    http: reqwest::Client,
    sendgrid_base: String,
    gmail_base: String,
}

impl HttpEmailApi {
    pub fn new(
        http: reqwest::Client,
        sendgrid_base: Option<String>,
        gmail_base: Option<String>,
    ) -> Self {
        Self {
            http,
            sendgrid_base: sendgrid_base.unwrap_or_else(|| "https://api.sendgrid.com".into()),
            gmail_base: gmail_base.unwrap_or_else(|| "https://gmail.googleapis.com".into()),
        }
    }

    async fn send_sendgrid(
        &self,
        api_key: &str,
        payload: &EmailPayload,
    ) -> Result<EmailProviderReceipt, EmailApiError> {
        let mut personalization = json!({ "to": [{ "email": payload.to }] });
        if let Some(cc) = &payload.cc {
            personalization["cc"] = json!([{ "email": cc }]);
        }
        if let Some(bcc) = &payload.bcc {
            personalization["bcc"] = json!([{ "email": bcc }]);
        }
        let mut body = json!({
            "personalizations": [personalization],
            "from": { "email": payload.from },
            "subject": payload.subject,
            "content": [{ "type": "text/html", "value": payload.body }],
            "custom_args": payload.custom_args,
        });
        if let Some(reply_to) = &payload.reply_to {
            body["reply_to"] = json!({ "email": reply_to });
        }
        if !payload.headers.is_empty() {
            body["headers"] = json!(payload.headers);
        }
        if !payload.attachments.is_empty() {
            body["attachments"] = Value::Array(
                payload
                    .attachments
                    .iter()
                    .map(|a| {
                        json!({
                            "content": STANDARD.encode(&a.data),
                            "type": a.mime_type,
                            "filename": a.name,
                        })
                    })
                    .collect(),
            );
        }

        let response = self
            .http
            .post(format!("{}/v3/mail/send", self.sendgrid_base))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| EmailApiError::Retryable(err.into()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(EmailProviderReceipt::Sendgrid {});
        }
        let text = response.text().await.unwrap_or_default();
        if is_retryable_status(status) {
            return Err(EmailApiError::Retryable(anyhow::anyhow!(
                "sendgrid returned {status}: {text}"
            )));
        }
        Err(EmailApiError::Rejected(EmailProviderFailure::Sendgrid {
            status: Some(status.as_u16()),
            body: Some(text),
        }))
    }

    async fn send_gmail(
        &self,
        access_token: &str,
        payload: &EmailPayload,
    ) -> Result<EmailProviderReceipt, EmailApiError> {
        let raw = URL_SAFE_NO_PAD.encode(build_mime(payload));
        let response = self
            .http
            .post(format!(
                "{}/gmail/v1/users/me/messages/send",
                self.gmail_base
            ))
            .bearer_auth(access_token)
            .json(&json!({ "raw": raw }))
            .send()
            .await
            .map_err(|err| EmailApiError::Retryable(err.into()))?;
        let status = response.status();
        if status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            return Ok(EmailProviderReceipt::Gmail {
                message_id: body["id"].as_str().map(str::to_string),
            });
        }
        let text = response.text().await.unwrap_or_default();
        if is_retryable_status(status) {
            return Err(EmailApiError::Retryable(anyhow::anyhow!(
                "gmail returned {status}: {text}"
            )));
        }
        Err(EmailApiError::Rejected(EmailProviderFailure::Gmail {
            message: format!("gmail returned {status}: {text}"),
        }))
    }
}

/// Assembles the RFC 2822 message Gmail expects; multipart/mixed when
/// attachments are present.
fn build_mime(payload: &EmailPayload) -> String {
    let mut head = String::new();
    head.push_str(&format!("From: {}\r\n", payload.from));
    head.push_str(&format!("To: {}\r\n", payload.to));
    if let Some(cc) = &payload.cc {
        head.push_str(&format!("Cc: {cc}\r\n"));
    }
    if let Some(bcc) = &payload.bcc {
        head.push_str(&format!("Bcc: {bcc}\r\n"));
    }
    if let Some(reply_to) = &payload.reply_to {
        head.push_str(&format!("Reply-To: {reply_to}\r\n"));
    }
    for (name, value) in &payload.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str(&format!("Subject: {}\r\n", payload.subject));
    head.push_str("MIME-Version: 1.0\r\n");

    if payload.attachments.is_empty() {
        head.push_str("Content-Type: text/html; charset=utf-8\r\n\r\n");
        head.push_str(&payload.body);
        return head;
    }

    let boundary = "peregrine-mime-boundary";
    head.push_str(&format!(
        "Content-Type: multipart/mixed; boundary={boundary}\r\n\r\n"
    ));
    head.push_str(&format!("--{boundary}\r\n"));
    head.push_str("Content-Type: text/html; charset=utf-8\r\n\r\n");
    head.push_str(&payload.body);
    head.push_str("\r\n");
    for attachment in &payload.attachments {
        head.push_str(&format!("--{boundary}\r\n"));
        head.push_str(&format!(
            "Content-Type: {}; name=\"{}\"\r\n",
            attachment.mime_type, attachment.name
        ));
        head.push_str("Content-Transfer-Encoding: base64\r\n");
        head.push_str(&format!(
            "Content-Disposition: attachment; filename=\"{}\"\r\n\r\n",
            attachment.name
        ));
        head.push_str(&STANDARD.encode(&attachment.data));
        head.push_str("\r\n");
    }
    head.push_str(&format!("--{boundary}--"));
    head
}

#[async_trait]
impl EmailApi for HttpEmailApi {
    async fn send(
        &self,
        credentials: &EmailCredentials,
        payload: &EmailPayload,
    ) -> Result<EmailProviderReceipt, EmailApiError> {
        match credentials {
            EmailCredentials::Sendgrid { api_key } => self.send_sendgrid(api_key, payload).await,
            EmailCredentials::Gmail { access_token } => {
                self.send_gmail(access_token, payload).await
            }
            EmailCredentials::Test => Ok(EmailProviderReceipt::Test {}),
        }
    }
}

// ---------------------------------------------------------------------------
// SMS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum SmsCredentials {
    Twilio {
        account_sid: String,
        auth_token: String,
        messaging_service_sid: String,
    },
    Test,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmsPayload {
    pub to: String,
    pub body: String,
}

#[derive(Debug)]
pub enum SmsApiError {
    Rejected(SmsProviderFailure),
    Retryable(anyhow::Error),
}

#[async_trait]
pub trait SmsApi: Send + Sync {
    async fn send(
        &self,
        credentials: &SmsCredentials,
        payload: &SmsPayload,
    ) -> Result<SmsProviderReceipt, SmsApiError>;
}

pub struct HttpSmsApi {
    http: reqwest::Client,
    twilio_base: String,
}

impl HttpSmsApi {
    pub fn new(http: reqwest::Client, twilio_base: Option<String>) -> Self {
        Self {
            http,
            twilio_base: twilio_base.unwrap_or_else(|| "https://api.twilio.com".into()),
        }
    }
}

#[async_trait]
impl SmsApi for HttpSmsApi {
    async fn send(
        &self,
        credentials: &SmsCredentials,
        payload: &SmsPayload,
    ) -> Result<SmsProviderReceipt, SmsApiError> {
        let SmsCredentials::Twilio {
            account_sid,
            auth_token,
            messaging_service_sid,
        } = credentials
        else {
            return Ok(SmsProviderReceipt::Test {});
        };

        let response = self
            .http
            .post(format!(
                "{}/2010-04-01/Accounts/{account_sid}/Messages.json",
                self.twilio_base
            ))
            .basic_auth(account_sid, Some(auth_token))
            .form(&[
                ("To", payload.to.as_str()),
                ("Body", payload.body.as_str()),
                ("MessagingServiceSid", messaging_service_sid.as_str()),
            ])
            .send()
            .await
            .map_err(|err| SmsApiError::Retryable(err.into()))?;
        let status = response.status();
        if status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            return Ok(SmsProviderReceipt::Twilio {
                sid: body["sid"].as_str().map(str::to_string),
            });
        }
        let text = response.text().await.unwrap_or_default();
        if is_retryable_status(status) {
            return Err(SmsApiError::Retryable(anyhow::anyhow!(
                "twilio returned {status}: {text}"
            )));
        }
        Err(SmsApiError::Rejected(SmsProviderFailure::Twilio {
            message: format!("twilio returned {status}: {text}"),
        }))
    }
}

// ---------------------------------------------------------------------------
// Webhook
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookRequest {
    pub url: String,
    pub method: Option<String>,
    pub params: Option<Value>,
    pub data: Option<Value>,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug)]
pub enum WebhookApiError {
    /// Non-retryable HTTP reject; the response is preserved for the failure
    /// variant.
    Rejected(WebhookResponsePayload),
    Retryable(anyhow::Error),
}

#[async_trait]
pub trait WebhookApi: Send + Sync {
    async fn execute(
        &self,
        request: &WebhookRequest,
    ) -> Result<WebhookResponsePayload, WebhookApiError>;
}

pub struct HttpWebhookApi {
    http: reqwest::Client,
}

impl HttpWebhookApi {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

fn response_headers(response: &reqwest::Response) -> BTreeMap<String, String> {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
}

#[async_trait]
impl WebhookApi for HttpWebhookApi {
    async fn execute(
        &self,
        request: &WebhookRequest,
    ) -> Result<WebhookResponsePayload, WebhookApiError> {
        let method = request
            .method
            .as_deref()
            .and_then(|m| reqwest::Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok())
            .unwrap_or(reqwest::Method::GET);

        let mut builder = self.http.request(method, &request.url);
        if let Some(Value::Object(params)) = &request.params {
            let query: Vec<(String, String)> = params
                .iter()
                .map(|(k, v)| {
                    let rendered = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), rendered)
                })
                .collect();
            builder = builder.query(&query);
        }
        if let Some(data) = &request.data {
            builder = builder.json(data);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| WebhookApiError::Retryable(err.into()))?;
        let status = response.status();
        let headers = response_headers(&response);
        let text = response.text().await.unwrap_or_default();
        // Any response shape is preserved opaquely for audit.
        let body = if text.is_empty() {
            None
        } else {
            Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
        };
        let payload = WebhookResponsePayload {
            status: Some(status.as_u16()),
            headers,
            body,
        };

        if status.is_success() {
            Ok(payload)
        } else if is_retryable_status(status) {
            Err(WebhookApiError::Retryable(anyhow::anyhow!(
                "webhook endpoint returned {status}"
            )))
        } else {
            Err(WebhookApiError::Rejected(payload))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_single_part_without_attachments() {
        let payload = EmailPayload {
            from: "a@x.io".into(),
            to: "b@x.io".into(),
            subject: "s".into(),
            body: "<b>hi</b>".into(),
            ..Default::default()
        };
        let mime = build_mime(&payload);
        assert!(mime.contains("Content-Type: text/html"));
        assert!(!mime.contains("multipart/mixed"));
        assert!(mime.ends_with("<b>hi</b>"));
    }

    #[test]
    fn mime_multipart_with_attachments() {
        let payload = EmailPayload {
            from: "a@x.io".into(),
            to: "b@x.io".into(),
            subject: "s".into(),
            body: "hi".into(),
            attachments: vec![EmailAttachment {
                name: "invoice.pdf".into(),
                mime_type: "application/pdf".into(),
                data: vec![1, 2, 3],
            }],
            ..Default::default()
        };
        let mime = build_mime(&payload);
        assert!(mime.contains("multipart/mixed"));
        assert!(mime.contains("filename=\"invoice.pdf\""));
        assert!(mime.trim_end().ends_with("--peregrine-mime-boundary--"));
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
    }
}
