use peregrine_core::{
    enrich_message_template, in_subscription_group, BadWorkspaceConfigurationVariant, Channel,
    MessageSendFailure, MessageSkippedVariant, TemplateDefinition, SUBSCRIPTION_SECRET_NAME,
};
use tracing::{debug, error};
use uuid::Uuid;

use crate::{DispatchError, Dispatcher, SendMessageParams};

/// Template content plus the workspace's subscription signing secret,
/// fetched together ahead of a send.
#[derive(Debug)]
pub(crate) struct SendModels {
    pub definition: TemplateDefinition,
    pub subscription_group_secret: Option<String>,
}

fn config_failure(variant: BadWorkspaceConfigurationVariant) -> MessageSendFailure {
    MessageSendFailure::BadWorkspaceConfiguration(variant)
}

/// Evaluates the subscription gate, then loads the template and subscription
/// secret concurrently. The gate runs first: when the user is not in the
/// group no provider call (and no further I/O) happens.
pub(crate) async fn get_send_models(
    dispatcher: &Dispatcher,
    params: &SendMessageParams,
    channel: Channel,
) -> Result<Result<SendModels, MessageSendFailure>, DispatchError> {
    if let Some(details) = &params.subscription_group_details {
        if !in_subscription_group(details) {
            return Ok(Err(MessageSendFailure::MessageSkipped(
                MessageSkippedVariant::SubscriptionState {
                    action: details.action,
                    subscription_group_type: details.group_type,
                },
            )));
        }
    }

    let (template, secret) = futures::future::join(
        find_message_template(dispatcher, params, channel),
        dispatcher
            .stores
            .secrets
            .secret_value(params.workspace_id, SUBSCRIPTION_SECRET_NAME),
    )
    .await;
    let subscription_group_secret = secret.map_err(DispatchError::retryable)?;

    match template? {
        Ok(definition) => Ok(Ok(SendModels {
            definition,
            subscription_group_secret,
        })),
        Err(failure) => Ok(Err(failure)),
    }
}

/// Loads and validates the template content for this send.
///
/// Malformed template ids are treated as "not found" rather than an error;
/// stored JSON that fails validation is a hard configuration problem.
async fn find_message_template(
    dispatcher: &Dispatcher,
    params: &SendMessageParams,
    channel: Channel,
) -> Result<Result<TemplateDefinition, MessageSendFailure>, DispatchError> {
    let Ok(template_id) = Uuid::parse_str(&params.template_id) else {
        debug!(
            template_id = %params.template_id,
            "malformed template id treated as not found"
        );
        return Ok(Err(config_failure(
            BadWorkspaceConfigurationVariant::MessageTemplateNotFound,
        )));
    };

    let row = dispatcher
        .stores
        .templates
        .find_template(template_id)
        .await
        .map_err(DispatchError::retryable)?;
    let Some(row) = row else {
        error!(
            template_id = %template_id,
            workspace_id = %params.workspace_id,
            "message template not found"
        );
        return Ok(Err(config_failure(
            BadWorkspaceConfigurationVariant::MessageTemplateNotFound,
        )));
    };

    let resource = match enrich_message_template(row) {
        Ok(resource) => resource,
        Err(err) => {
            error!(
                template_id = %template_id,
                workspace_id = %params.workspace_id,
                error = %err,
                "failed to parse message template definition"
            );
            return Ok(Err(config_failure(
                BadWorkspaceConfigurationVariant::MessageTemplateMisconfigured {
                    message: "failed to parse message template definition".to_string(),
                },
            )));
        }
    };

    let Some(definition) = resource.content(params.use_draft) else {
        debug!(template_id = %template_id, "message template has no definition");
        return Ok(Err(config_failure(
            BadWorkspaceConfigurationVariant::MessageTemplateNotFound,
        )));
    };
    if definition.channel() != channel {
        return Ok(Err(config_failure(
            BadWorkspaceConfigurationVariant::MessageTemplateNotFound,
        )));
    }
    Ok(Ok(definition.clone()))
}
