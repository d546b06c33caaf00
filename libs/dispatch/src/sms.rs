//! SMS channel dispatch. Phone numbers may arrive as numeric assignments, so
//! identifier resolution coerces numbers to strings.

use peregrine_core::outcome::{MessageFailureVariant, SmsMessageSent};
use peregrine_core::{
    identifier_for, BadWorkspaceConfigurationVariant, Channel, MessageSendFailure,
    MessageSendSuccess, MessageSentVariant, MessageSkippedVariant, SendResult, TemplateDefinition,
};
use peregrine_render::RenderContext;

use crate::clients::{SmsApiError, SmsPayload};
use crate::models::get_send_models;
use crate::record::tag_map;
use crate::resolve::resolve_sms_provider;
use crate::{DispatchError, Dispatcher, SendMessageParams};

pub(crate) async fn send_sms(
    dispatcher: &Dispatcher,
    params: &SendMessageParams,
) -> Result<SendResult, DispatchError> {
    let (models, credentials) = futures::future::join(
        get_send_models(dispatcher, params, Channel::Sms),
        resolve_sms_provider(dispatcher, params),
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

    let TemplateDefinition::Sms(template) = &models.definition else {
        return Ok(Err(MessageSendFailure::BadWorkspaceConfiguration(
            BadWorkspaceConfigurationVariant::MessageTemplateMisconfigured {
                message: "message template is not an sms template".to_string(),
            },
        )));
    };

    let Some(to) = identifier_for(&params.user_property_assignments, "phone") else {
        return Ok(Err(MessageSendFailure::MessageSkipped(
            MessageSkippedVariant::MissingIdentifier {
                identifier_key: "phone".to_string(),
            },
        )));
    };

    let mut ctx = RenderContext::new(&params.user_property_assignments, params.workspace_id);
    ctx.identifier_key = Some("phone");
    ctx.subscription_group_id = params.subscription_group_details.as_ref().map(|d| d.id);
    ctx.tags = tag_map(params);

    let body = match dispatcher.renderer.render(&template.body, &ctx) {
        Ok(body) => body,
        Err(error) => {
            return Ok(Err(MessageSendFailure::BadWorkspaceConfiguration(
                BadWorkspaceConfigurationVariant::MessageTemplateRenderError {
                    field: "body".to_string(),
                    error,
                },
            )));
        }
    };

    let payload = SmsPayload {
        to: to.clone(),
        body: body.clone(),
    };
    match dispatcher.sms_api.send(&credentials, &payload).await {
        Ok(provider) => Ok(Ok(MessageSendSuccess {
            variant: MessageSentVariant::Sms(SmsMessageSent { to, body, provider }),
        })),
        Err(SmsApiError::Rejected(provider)) => Ok(Err(MessageSendFailure::MessageFailure(
            MessageFailureVariant::Sms { provider },
        ))),
        Err(SmsApiError::Retryable(err)) => Err(DispatchError::Retryable(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{dispatcher_fixture, sms_params, Fixture};
    use peregrine_core::outcome::SmsProviderReceipt;
    use peregrine_core::stores::MessageTemplateRow;
    use peregrine_core::{
        SmsProviderRow, SmsProviderType, SubscriptionChange, SubscriptionGroupDetails,
        SubscriptionGroupType,
    };
    use serde_json::{json, Value};
    use uuid::Uuid;

    async fn seed(fixture: &Fixture, definition: Value) -> Uuid {
        let id = Uuid::new_v4();
        fixture
            .templates
            .insert(MessageTemplateRow {
                id,
                workspace_id: fixture.workspace_id,
                name: "otp-sms".into(),
                definition: Some(definition),
                draft: None,
            })
            .await;
        fixture
            .providers
            .insert_sms(
                fixture.workspace_id,
                SmsProviderRow {
                    provider_type: SmsProviderType::Test,
                    secret: None,
                },
                true,
            )
            .await;
        id
    }

    #[tokio::test]
    async fn renders_and_sends() {
        let fixture = dispatcher_fixture().await;
        let template_id = seed(
            &fixture,
            json!({"type": "Sms", "body": "Hi {{ user.firstName }}"}),
        )
        .await;
        let mut params = sms_params(&fixture);
        params.template_id = template_id.to_string();
        params
            .user_property_assignments
            .insert("phone".into(), json!("15551234567"));
        params
            .user_property_assignments
            .insert("firstName".into(), json!("Ada"));

        let result = fixture.dispatcher.send_message(&params).await.unwrap();
        let MessageSentVariant::Sms(sent) = result.unwrap().variant else {
            panic!("expected sms variant");
        };
        assert_eq!(sent.to, "15551234567");
        assert_eq!(sent.body, "Hi Ada");
        assert_eq!(sent.provider, SmsProviderReceipt::Test {});
    }

    #[tokio::test]
    async fn numeric_phone_assignment_is_coerced() {
        let fixture = dispatcher_fixture().await;
        let template_id = seed(&fixture, json!({"type": "Sms", "body": "hi"})).await;
        let mut params = sms_params(&fixture);
        params.template_id = template_id.to_string();
        params
            .user_property_assignments
            .insert("phone".into(), json!(15551234567u64));

        let result = fixture.dispatcher.send_message(&params).await.unwrap();
        let MessageSentVariant::Sms(sent) = result.unwrap().variant else {
            panic!("expected sms variant");
        };
        assert_eq!(sent.to, "15551234567");
    }

    #[tokio::test]
    async fn missing_phone_skips() {
        let fixture = dispatcher_fixture().await;
        let template_id = seed(&fixture, json!({"type": "Sms", "body": "hi"})).await;
        let mut params = sms_params(&fixture);
        params.template_id = template_id.to_string();

        let result = fixture.dispatcher.send_message(&params).await.unwrap();
        assert_eq!(
            result,
            Err(MessageSendFailure::MessageSkipped(
                MessageSkippedVariant::MissingIdentifier {
                    identifier_key: "phone".into()
                }
            ))
        );
        assert_eq!(fixture.sms_api.call_count().await, 0);
    }

    #[tokio::test]
    async fn unsubscribed_user_never_reaches_provider() {
        let fixture = dispatcher_fixture().await;
        let template_id = seed(&fixture, json!({"type": "Sms", "body": "hi"})).await;
        let mut params = sms_params(&fixture);
        params.template_id = template_id.to_string();
        params
            .user_property_assignments
            .insert("phone".into(), json!("15551234567"));
        params.subscription_group_details = Some(SubscriptionGroupDetails {
            id: Uuid::new_v4(),
            name: "promos".into(),
            group_type: SubscriptionGroupType::OptOut,
            action: Some(SubscriptionChange::Unsubscribe),
        });

        let result = fixture.dispatcher.send_message(&params).await.unwrap();
        assert!(matches!(
            result,
            Err(MessageSendFailure::MessageSkipped(
                MessageSkippedVariant::SubscriptionState { .. }
            ))
        ));
        assert_eq!(fixture.sms_api.call_count().await, 0);
    }

    #[tokio::test]
    async fn mobile_push_is_unimplemented() {
        let fixture = dispatcher_fixture().await;
        let mut params = sms_params(&fixture);
        params.channel = Channel::MobilePush;
        let err = fixture.dispatcher.send_message(&params).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Unimplemented(Channel::MobilePush)
        ));
    }
}
