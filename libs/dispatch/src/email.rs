//! Email channel dispatch: template + provider resolution run concurrently,
//! then the email fields render fail-fast, unsubscribe headers and
//! attachments are assembled, and exactly one provider call happens.

use std::collections::BTreeMap;

use peregrine_core::outcome::{AttachmentEcho, EmailMessageSent, MessageFailureVariant};
use peregrine_core::{
    BadWorkspaceConfigurationVariant, Channel, MessageSendFailure, MessageSendSuccess,
    MessageSentVariant, MessageSkippedVariant, SendResult, TemplateDefinition,
};
use peregrine_render::RenderContext;
use serde_json::Value;

use crate::clients::{EmailApiError, EmailPayload};
use crate::models::get_send_models;
use crate::record::tag_map;
use crate::resolve::resolve_email_provider;
use crate::unsubscribe::{construct_unsubscribe_headers, UnsubscribeContext};
use crate::{attachments, DispatchError, Dispatcher, SendMessageParams};

/// Email recipients must be string-typed assignments; numeric coercion never
/// produces a deliverable address.
fn email_identifier(params: &SendMessageParams) -> Option<String> {
    match params.user_property_assignments.get("email") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

pub(crate) async fn send_email(
    dispatcher: &Dispatcher,
    params: &SendMessageParams,
) -> Result<SendResult, DispatchError> {
    let (models, credentials) = futures::future::join(
        get_send_models(dispatcher, params, Channel::Email),
        resolve_email_provider(dispatcher, params),
    )
    .await;

    let models = match models? {
        Ok(models) => models,
        Err(failure) => return Ok(Err(failure)),
    };
    let credentials = match credentials? {
        Ok(credentials) => credentials,
        Err(failure) => return Ok(Err(failure)),
    };

    let TemplateDefinition::Email(template) = &models.definition else {
        return Ok(Err(MessageSendFailure::BadWorkspaceConfiguration(
            BadWorkspaceConfigurationVariant::MessageTemplateMisconfigured {
                message: "message template is not an email template".to_string(),
            },
        )));
    };

    let Some(to) = email_identifier(params) else {
        return Ok(Err(MessageSendFailure::MessageSkipped(
            MessageSkippedVariant::MissingIdentifier {
                identifier_key: "email".to_string(),
            },
        )));
    };

    let mut ctx = RenderContext::new(&params.user_property_assignments, params.workspace_id);
    ctx.identifier_key = Some("email");
    ctx.subscription_group_id = params.subscription_group_details.as_ref().map(|d| d.id);
    ctx.tags = tag_map(params);
    if let Some(secret) = &models.subscription_group_secret {
        ctx.secrets
            .insert("subscriptionKey".to_string(), secret.clone());
    }

    let mut fields: Vec<(&str, Option<&str>)> = vec![
        ("from", Some(template.from.as_str())),
        ("subject", Some(template.subject.as_str())),
        ("body", Some(template.body.as_str())),
        ("replyTo", template.reply_to.as_deref()),
        ("name", template.name.as_deref()),
        ("cc", template.cc.as_deref()),
        ("bcc", template.bcc.as_deref()),
    ];
    for header in &template.headers {
        fields.push((header.name.as_str(), Some(header.value.as_str())));
    }

    let mut rendered = match dispatcher.renderer.render_fields(&fields, &ctx) {
        Ok(rendered) => rendered,
        Err(err) => {
            return Ok(Err(MessageSendFailure::BadWorkspaceConfiguration(
                BadWorkspaceConfigurationVariant::MessageTemplateRenderError {
                    field: err.field,
                    error: err.error,
                },
            )));
        }
    };

    // Standard fields leave the map; whatever remains is a custom header.
    let from_address = rendered.remove("from").unwrap_or_default();
    let subject = rendered.remove("subject").unwrap_or_default();
    let body = rendered.remove("body").unwrap_or_default();
    let reply_to = rendered.remove("replyTo").filter(|v| !v.is_empty());
    let display_name = rendered.remove("name").filter(|v| !v.is_empty());
    let cc = rendered.remove("cc").filter(|v| !v.is_empty());
    let bcc = rendered.remove("bcc").filter(|v| !v.is_empty());
    let from = match &display_name {
        Some(name) => format!("{name} <{from_address}>"),
        None => from_address,
    };

    let mut headers: BTreeMap<String, String> = rendered;
    if let (Some(secret), Some(group)) = (
        &models.subscription_group_secret,
        &params.subscription_group_details,
    ) {
        headers.extend(construct_unsubscribe_headers(&UnsubscribeContext {
            workspace_id: params.workspace_id,
            user_id: &params.user_id,
            identifier: &to,
            identifier_key: "email",
            subscription_group: group,
            secret,
            dashboard_base_url: &dispatcher.config.dashboard_base_url,
        }));
    }

    let attachments = attachments::fetch_attachments(dispatcher, &template.attachments).await?;

    let mut custom_args = tag_map(params);
    custom_args.insert("workspaceId".to_string(), params.workspace_id.to_string());
    custom_args.insert("userId".to_string(), params.user_id.clone());

    let payload = EmailPayload {
        from: from.clone(),
        to: to.clone(),
        subject: subject.clone(),
        body: body.clone(),
        reply_to: reply_to.clone(),
        cc: cc.clone(),
        bcc: bcc.clone(),
        headers: headers.clone(),
        attachments,
        custom_args,
    };

    match dispatcher.email_api.send(&credentials, &payload).await {
        Ok(receipt) => Ok(Ok(MessageSendSuccess {
            variant: MessageSentVariant::Email(EmailMessageSent {
                from,
                to,
                subject,
                body,
                reply_to,
                cc,
                bcc,
                headers,
                attachments: payload
                    .attachments
                    .iter()
                    .map(|a| AttachmentEcho {
                        name: a.name.clone(),
                        mime_type: a.mime_type.clone(),
                    })
                    .collect(),
                provider: receipt,
            }),
        })),
        Err(EmailApiError::Rejected(provider)) => Ok(Err(MessageSendFailure::MessageFailure(
            MessageFailureVariant::Email { provider },
        ))),
        Err(EmailApiError::Retryable(err)) => Err(DispatchError::Retryable(err)),
    }
}
