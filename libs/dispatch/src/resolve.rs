//! Provider resolution: explicit override, then the workspace's configured
//! provider, then a one-level parent-workspace fallback. Per-occupant OAuth
//! providers (Gmail) resolve through the token store instead, refreshing
//! proactively when expiry falls inside the configured look-ahead window.

use peregrine_core::{
    BadWorkspaceConfigurationVariant, EmailProviderRow, EmailProviderSecret, EmailProviderType,
    MessageSendFailure, SmsProviderRow, SmsProviderSecret, SmsProviderType,
};
use tracing::warn;
use uuid::Uuid;

use crate::clients::{EmailCredentials, SmsCredentials};
use crate::{now_ms, DispatchError, Dispatcher, SendMessageParams};

fn misconfigured(message: impl Into<String>) -> MessageSendFailure {
    MessageSendFailure::BadWorkspaceConfiguration(
        BadWorkspaceConfigurationVariant::MessageServiceProviderMisconfigured {
            message: message.into(),
        },
    )
}

fn not_found() -> MessageSendFailure {
    MessageSendFailure::BadWorkspaceConfiguration(
        BadWorkspaceConfigurationVariant::MessageServiceProviderNotFound,
    )
}

/// Looks up a provider row in the workspace, falling back to its parent
/// exactly once. Bounded to depth 2 so self-referential parent data can never
/// recurse.
async fn email_row_with_fallback(
    dispatcher: &Dispatcher,
    workspace_id: Uuid,
    provider: Option<EmailProviderType>,
) -> Result<Option<EmailProviderRow>, DispatchError> {
    let mut workspace = workspace_id;
    for _ in 0..2 {
        if let Some(row) = dispatcher
            .stores
            .providers
            .email_provider(workspace, provider)
            .await
            .map_err(DispatchError::retryable)?
        {
            return Ok(Some(row));
        }
        match dispatcher
            .stores
            .workspaces
            .parent_workspace(workspace)
            .await
            .map_err(DispatchError::retryable)?
        {
            Some(parent) if parent != workspace => workspace = parent,
            _ => break,
        }
    }
    Ok(None)
}

async fn sms_row_with_fallback(
    dispatcher: &Dispatcher,
    workspace_id: Uuid,
    provider: Option<SmsProviderType>,
) -> Result<Option<SmsProviderRow>, DispatchError> {
    let mut workspace = workspace_id;
    for _ in 0..2 {
        if let Some(row) = dispatcher
            .stores
            .providers
            .sms_provider(workspace, provider)
            .await
            .map_err(DispatchError::retryable)?
        {
            return Ok(Some(row));
        }
        match dispatcher
            .stores
            .workspaces
            .parent_workspace(workspace)
            .await
            .map_err(DispatchError::retryable)?
        {
            Some(parent) if parent != workspace => workspace = parent,
            _ => break,
        }
    }
    Ok(None)
}

/// Resolves per-occupant Gmail credentials, refreshing the token when it
/// expires inside the look-ahead window.
async fn gmail_credentials(
    dispatcher: &Dispatcher,
    params: &SendMessageParams,
) -> Result<Result<EmailCredentials, MessageSendFailure>, DispatchError> {
    let Some(occupant_id) = params.occupant_id.as_deref() else {
        return Ok(Err(misconfigured(
            "gmail provider requires a workspace occupant identity",
        )));
    };
    let token = dispatcher
        .stores
        .tokens
        .get_token(params.workspace_id, occupant_id)
        .await
        .map_err(DispatchError::retryable)?;
    let Some(token) = token else {
        return Ok(Err(misconfigured(
            "no gmail account connected for workspace occupant",
        )));
    };

    let window_ms = dispatcher.config.oauth_refresh_window_secs * 1_000;
    let token = if token.expires_at.saturating_sub(now_ms()) < window_ms {
        match dispatcher
            .stores
            .tokens
            .refresh_token(params.workspace_id, occupant_id)
            .await
            .map_err(DispatchError::retryable)?
        {
            Some(refreshed) => refreshed,
            None => {
                warn!(
                    workspace_id = %params.workspace_id,
                    occupant_id,
                    "gmail token refresh returned no token"
                );
                return Ok(Err(misconfigured("failed to refresh gmail token")));
            }
        }
    } else {
        token
    };

    Ok(Ok(EmailCredentials::Gmail {
        access_token: token.access_token,
    }))
}

pub(crate) async fn resolve_email_provider(
    dispatcher: &Dispatcher,
    params: &SendMessageParams,
) -> Result<Result<EmailCredentials, MessageSendFailure>, DispatchError> {
    // An occupant-scoped override (Gmail) resolves via the occupant's tokens
    // without consulting the workspace provider table at all.
    if params
        .email_provider_override
        .is_some_and(|provider| !provider.is_workspace_scoped())
    {
        return gmail_credentials(dispatcher, params).await;
    }

    let row = email_row_with_fallback(
        dispatcher,
        params.workspace_id,
        params.email_provider_override,
    )
    .await?;
    let Some(row) = row else {
        return Ok(Err(not_found()));
    };

    match row.provider_type {
        EmailProviderType::Gmail => gmail_credentials(dispatcher, params).await,
        EmailProviderType::Test => Ok(Ok(EmailCredentials::Test)),
        EmailProviderType::Sendgrid => {
            let Some(raw) = row.secret else {
                return Ok(Err(misconfigured(
                    "Missing messaging service provider config. Configure in settings.",
                )));
            };
            let secret: EmailProviderSecret = match serde_json::from_value(raw.clone()) {
                Ok(secret) => secret,
                Err(err) => {
                    warn!(error = %err, "message service provider config malformed");
                    return Ok(Err(misconfigured(
                        "Application error: message service provider config malformed.",
                    )));
                }
            };
            match secret {
                EmailProviderSecret::Sendgrid { api_key: Some(api_key) } => {
                    Ok(Ok(EmailCredentials::Sendgrid { api_key }))
                }
                EmailProviderSecret::Sendgrid { api_key: None } => Ok(Err(misconfigured(
                    "missing apiKey in sendgrid secret config",
                ))),
                other => Ok(Err(misconfigured(format!(
                    "expected sendgrid secret config but got {other:?}"
                )))),
            }
        }
    }
}

pub(crate) async fn resolve_sms_provider(
    dispatcher: &Dispatcher,
    params: &SendMessageParams,
) -> Result<Result<SmsCredentials, MessageSendFailure>, DispatchError> {
    let row = sms_row_with_fallback(
        dispatcher,
        params.workspace_id,
        params.sms_provider_override,
    )
    .await?;
    let Some(row) = row else {
        return Ok(Err(not_found()));
    };

    match row.provider_type {
        SmsProviderType::Test => Ok(Ok(SmsCredentials::Test)),
        SmsProviderType::Twilio => {
            let Some(raw) = row.secret else {
                return Ok(Err(misconfigured(
                    "Missing messaging service provider config. Configure in settings.",
                )));
            };
            let secret: SmsProviderSecret = match serde_json::from_value(raw.clone()) {
                Ok(secret) => secret,
                Err(err) => {
                    warn!(error = %err, "sms provider config malformed");
                    return Ok(Err(misconfigured(err.to_string())));
                }
            };
            match secret {
                SmsProviderSecret::Twilio {
                    account_sid: Some(account_sid),
                    auth_token: Some(auth_token),
                    messaging_service_sid: Some(messaging_service_sid),
                } => Ok(Ok(SmsCredentials::Twilio {
                    account_sid,
                    auth_token,
                    messaging_service_sid,
                })),
                SmsProviderSecret::Twilio { .. } => Ok(Err(misconfigured(
                    "missing accountSid, authToken, or messagingServiceSid in sms provider config",
                ))),
                other => Ok(Err(misconfigured(format!(
                    "expected twilio secret config but got {other:?}"
                )))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{dispatcher_fixture, sms_params};
    use peregrine_core::OauthToken;
    use serde_json::json;

    #[tokio::test]
    async fn provider_inherited_from_parent_workspace() {
        let fixture = dispatcher_fixture().await;
        let parent = Uuid::new_v4();
        fixture
            .workspaces
            .set_parent(fixture.workspace_id, parent)
            .await;
        fixture
            .providers
            .insert_sms(
                parent,
                SmsProviderRow {
                    provider_type: SmsProviderType::Test,
                    secret: None,
                },
                true,
            )
            .await;

        let params = sms_params(&fixture);
        let creds = resolve_sms_provider(&fixture.dispatcher, &params)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(creds, SmsCredentials::Test);
    }

    #[tokio::test]
    async fn fallback_is_one_level_only() {
        let fixture = dispatcher_fixture().await;
        let parent = Uuid::new_v4();
        let grandparent = Uuid::new_v4();
        fixture
            .workspaces
            .set_parent(fixture.workspace_id, parent)
            .await;
        fixture.workspaces.set_parent(parent, grandparent).await;
        fixture
            .providers
            .insert_sms(
                grandparent,
                SmsProviderRow {
                    provider_type: SmsProviderType::Test,
                    secret: None,
                },
                true,
            )
            .await;

        let params = sms_params(&fixture);
        let result = resolve_sms_provider(&fixture.dispatcher, &params)
            .await
            .unwrap();
        assert_eq!(result, Err(not_found()));
    }

    #[tokio::test]
    async fn self_referential_parent_terminates() {
        let fixture = dispatcher_fixture().await;
        fixture
            .workspaces
            .set_parent(fixture.workspace_id, fixture.workspace_id)
            .await;
        let params = sms_params(&fixture);
        let result = resolve_sms_provider(&fixture.dispatcher, &params)
            .await
            .unwrap();
        assert_eq!(result, Err(not_found()));
    }

    #[tokio::test]
    async fn malformed_twilio_secret_is_misconfigured() {
        let fixture = dispatcher_fixture().await;
        fixture
            .providers
            .insert_sms(
                fixture.workspace_id,
                SmsProviderRow {
                    provider_type: SmsProviderType::Twilio,
                    secret: Some(json!({"type": "Twilio", "accountSid": "AC1"})),
                },
                true,
            )
            .await;
        let params = sms_params(&fixture);
        let result = resolve_sms_provider(&fixture.dispatcher, &params)
            .await
            .unwrap();
        assert!(matches!(
            result,
            Err(MessageSendFailure::BadWorkspaceConfiguration(
                BadWorkspaceConfigurationVariant::MessageServiceProviderMisconfigured { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn gmail_token_inside_window_is_refreshed() {
        let fixture = dispatcher_fixture().await;
        fixture
            .tokens
            .set_token(
                fixture.workspace_id,
                "occupant-1",
                OauthToken {
                    access_token: "stale".into(),
                    refresh_token: "r".into(),
                    // expires within the 10 minute window
                    expires_at: now_ms() + 60_000,
                },
            )
            .await;
        let mut params = sms_params(&fixture);
        params.email_provider_override = Some(EmailProviderType::Gmail);
        params.occupant_id = Some("occupant-1".into());

        let creds = resolve_email_provider(&fixture.dispatcher, &params)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            creds,
            EmailCredentials::Gmail {
                access_token: "refreshed".into()
            }
        );
        assert_eq!(fixture.tokens.refresh_calls().await, 1);
    }

    #[tokio::test]
    async fn gmail_token_outside_window_is_used_directly() {
        let fixture = dispatcher_fixture().await;
        fixture
            .tokens
            .set_token(
                fixture.workspace_id,
                "occupant-1",
                OauthToken {
                    access_token: "fresh".into(),
                    refresh_token: "r".into(),
                    expires_at: now_ms() + 3_600_000,
                },
            )
            .await;
        let mut params = sms_params(&fixture);
        params.email_provider_override = Some(EmailProviderType::Gmail);
        params.occupant_id = Some("occupant-1".into());

        let creds = resolve_email_provider(&fixture.dispatcher, &params)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            creds,
            EmailCredentials::Gmail {
                access_token: "fresh".into()
            }
        );
        assert_eq!(fixture.tokens.refresh_calls().await, 0);
    }

    #[tokio::test]
    async fn gmail_without_occupant_is_misconfigured() {
        let fixture = dispatcher_fixture().await;
        let mut params = sms_params(&fixture);
        params.email_provider_override = Some(EmailProviderType::Gmail);
        let result = resolve_email_provider(&fixture.dispatcher, &params)
            .await
            .unwrap();
        assert!(matches!(
            result,
            Err(MessageSendFailure::BadWorkspaceConfiguration(
                BadWorkspaceConfigurationVariant::MessageServiceProviderMisconfigured { .. }
            ))
        ));
    }
}
