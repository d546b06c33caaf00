//! Webhook channel dispatch. A webhook template has two halves: a public
//! config (echoed into the delivery record) and a secret half rendered with
//! the workspace's private webhook values. The halves merge secret-wins
//! before the request executes; the echo is built from the public half only
//! so secrets never reach the event log.

use std::collections::BTreeMap;

use peregrine_core::outcome::{MessageFailureVariant, WebhookMessageSent, WebhookRequestEcho};
use peregrine_core::{
    identifier_for, BadWorkspaceConfigurationVariant, Channel, MessageSendFailure,
    MessageSendSuccess, MessageSentVariant, MessageSkippedVariant, SendResult, TemplateDefinition,
    WebhookConfigTemplate, MESSAGE_ID_HEADER, WEBHOOK_SECRET_NAME,
};
use peregrine_render::RenderContext;
use serde_json::{Map, Value};

use crate::clients::{WebhookApiError, WebhookRequest};
use crate::models::get_send_models;
use crate::record::tag_map;
use crate::{DispatchError, Dispatcher, SendMessageParams};

fn config_failure(variant: BadWorkspaceConfigurationVariant) -> MessageSendFailure {
    MessageSendFailure::BadWorkspaceConfiguration(variant)
}

/// One rendered half of a webhook template.
#[derive(Debug, Default, Clone, PartialEq)]
struct RenderedHalf {
    url: Option<String>,
    method: Option<String>,
    params: Option<Value>,
    data: Option<Value>,
    headers: BTreeMap<String, String>,
}

/// Renders every templated field of a half; render failures are tagged with
/// `prefix.field` so the workspace owner can tell the halves apart.
fn render_half(
    dispatcher: &Dispatcher,
    template: &WebhookConfigTemplate,
    ctx: &RenderContext<'_>,
    prefix: &str,
) -> Result<RenderedHalf, MessageSendFailure> {
    let render_error = |field: &str, error: String| {
        config_failure(BadWorkspaceConfigurationVariant::MessageTemplateRenderError {
            field: format!("{prefix}.{field}"),
            error,
        })
    };
    let render_opt = |field: &str, source: &Option<String>| -> Result<Option<String>, MessageSendFailure> {
        match source {
            Some(source) => dispatcher
                .renderer
                .render(source, ctx)
                .map(Some)
                .map_err(|error| render_error(field, error)),
            None => Ok(None),
        }
    };

    let url = render_opt("url", &template.url)?;
    let method = render_opt("method", &template.method)?;
    let params = render_opt("params", &template.params)?
        .map(|raw| {
            serde_json::from_str::<Value>(&raw)
                .map_err(|err| render_error("params", format!("not valid JSON: {err}")))
        })
        .transpose()?;
    let data = render_opt("data", &template.data)?
        .map(|raw| {
            serde_json::from_str::<Value>(&raw)
                .map_err(|err| render_error("data", format!("not valid JSON: {err}")))
        })
        .transpose()?;

    let mut headers = BTreeMap::new();
    for (name, value) in &template.headers {
        let rendered = dispatcher
            .renderer
            .render(value, ctx)
            .map_err(|error| render_error(name, error))?;
        headers.insert(name.clone(), rendered);
    }

    Ok(RenderedHalf {
        url,
        method,
        params,
        data,
        headers,
    })
}

/// Recursive object merge; `b` wins on conflicts and non-object values.
fn deep_merge(a: Option<Value>, b: Option<Value>) -> Option<Value> {
    match (a, b) {
        (Some(Value::Object(base)), Some(Value::Object(over))) => {
            let mut merged: Map<String, Value> = base;
            for (key, value) in over {
                let entry = merged.remove(&key);
                if let Some(v) = deep_merge(entry, Some(value)) {
                    merged.insert(key, v);
                }
            }
            Some(Value::Object(merged))
        }
        (_, Some(over)) => Some(over),
        (base, None) => base,
    }
}

/// Workspace webhook secrets are a flat JSON object of string fields.
fn parse_webhook_secrets(raw: &str) -> Option<BTreeMap<String, String>> {
    let Value::Object(map) = serde_json::from_str::<Value>(raw).ok()? else {
        return None;
    };
    let mut out = BTreeMap::new();
    for (key, value) in map {
        match value {
            Value::String(s) => {
                out.insert(key, s);
            }
            other => {
                out.insert(key, other.to_string());
            }
        }
    }
    Some(out)
}

pub(crate) async fn send_webhook(
    dispatcher: &Dispatcher,
    params: &SendMessageParams,
) -> Result<SendResult, DispatchError> {
    let models = match get_send_models(dispatcher, params, Channel::Webhook).await? {
        Ok(models) => models,
        Err(failure) => return Ok(Err(failure)),
    };

    let TemplateDefinition::Webhook(template) = &models.definition else {
        return Ok(Err(config_failure(
            BadWorkspaceConfigurationVariant::MessageTemplateMisconfigured {
                message: "message template is not a webhook template".to_string(),
            },
        )));
    };

    let identifier_key = template.identifier_key.as_str();
    let Some(to) = identifier_for(&params.user_property_assignments, identifier_key) else {
        return Ok(Err(MessageSendFailure::MessageSkipped(
            MessageSkippedVariant::MissingIdentifier {
                identifier_key: identifier_key.to_string(),
            },
        )));
    };

    let raw_secrets = dispatcher
        .stores
        .secrets
        .secret_value(params.workspace_id, WEBHOOK_SECRET_NAME)
        .await
        .map_err(DispatchError::retryable)?;
    let secret_values = match raw_secrets.as_deref() {
        Some(raw) => match parse_webhook_secrets(raw) {
            Some(values) => values,
            None => {
                return Ok(Err(config_failure(
                    BadWorkspaceConfigurationVariant::MessageServiceProviderMisconfigured {
                        message: "malformed webhook secret config".to_string(),
                    },
                )));
            }
        },
        None => BTreeMap::new(),
    };

    let mut ctx = RenderContext::new(&params.user_property_assignments, params.workspace_id);
    ctx.identifier_key = Some(identifier_key);
    ctx.subscription_group_id = params.subscription_group_details.as_ref().map(|d| d.id);
    ctx.tags = tag_map(params);
    ctx.secrets = secret_values;

    let config = match render_half(dispatcher, &template.config, &ctx, "config") {
        Ok(half) => half,
        Err(failure) => return Ok(Err(failure)),
    };
    let secret = match render_half(dispatcher, &template.secret, &ctx, "secret") {
        Ok(half) => half,
        Err(failure) => return Ok(Err(failure)),
    };

    let Some(url) = secret.url.clone().or_else(|| config.url.clone()) else {
        return Ok(Err(config_failure(
            BadWorkspaceConfigurationVariant::MessageTemplateMisconfigured {
                message: "webhook template has no url".to_string(),
            },
        )));
    };

    let mut headers = config.headers.clone();
    headers.extend(secret.headers.clone());
    headers.insert(MESSAGE_ID_HEADER.to_string(), params.tags.message_id.clone());

    let request = WebhookRequest {
        url,
        method: secret.method.clone().or_else(|| config.method.clone()),
        params: deep_merge(config.params.clone(), secret.params.clone()),
        data: deep_merge(config.data.clone(), secret.data.clone()),
        headers,
    };

    // The echo drops the secret half entirely; only public config plus the
    // correlation header shape survives into the event log.
    let echo = WebhookRequestEcho {
        url: config.url,
        method: config.method,
        params: config.params,
        data: config.data,
        headers: config.headers,
    };

    match dispatcher.webhook_api.execute(&request).await {
        Ok(response) => Ok(Ok(MessageSendSuccess {
            variant: MessageSentVariant::Webhook(WebhookMessageSent {
                to,
                request: echo,
                response,
            }),
        })),
        Err(WebhookApiError::Rejected(response)) => Ok(Err(MessageSendFailure::MessageFailure(
            MessageFailureVariant::Webhook { response },
        ))),
        Err(WebhookApiError::Retryable(err)) => Err(DispatchError::Retryable(err)),
    }
}
