//! Wraps the templating engine behind a render-a-named-set-of-fields
//! interface. Rendering is fail-fast: the first field that errors aborts the
//! whole set with a field-tagged error, so callers can surface exactly which
//! template field is broken.

use std::collections::BTreeMap;

use handlebars::Handlebars;
use peregrine_core::UserPropertyAssignments;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Context available to every template field during a render.
#[derive(Debug, Clone)]
pub struct RenderContext<'a> {
    pub user_properties: &'a UserPropertyAssignments,
    pub workspace_id: Uuid,
    /// The channel's recipient identifier key, exposed to templates.
    pub identifier_key: Option<&'a str>,
    pub subscription_group_id: Option<Uuid>,
    pub tags: BTreeMap<String, String>,
    /// Secret values (subscription signing key, webhook secrets) available
    /// under `secrets.*`.
    pub secrets: BTreeMap<String, String>,
}

impl<'a> RenderContext<'a> {
    pub fn new(user_properties: &'a UserPropertyAssignments, workspace_id: Uuid) -> Self {
        Self {
            user_properties,
            workspace_id,
            identifier_key: None,
            subscription_group_id: None,
            tags: BTreeMap::new(),
            secrets: BTreeMap::new(),
        }
    }
}

/// A template field that failed to render.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("failed to render template field {field}: {error}")]
pub struct RenderFieldError {
    pub field: String,
    pub error: String,
}

#[derive(Debug)]
pub struct Renderer {
    registry: Handlebars<'static>,
}

impl Default for Renderer {
    fn default() -> Self {
        let mut registry = Handlebars::new();
        // Unknown variables render empty rather than failing; template
        // authors reference optional user properties routinely.
        registry.set_strict_mode(false);
        // Templates produce plain text, JSON, and raw HTML bodies; entity
        // escaping would corrupt all three.
        registry.register_escape_fn(handlebars::no_escape);
        Self { registry }
    }
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Renders one template string against the context.
    pub fn render(&self, template: &str, ctx: &RenderContext<'_>) -> Result<String, String> {
        let data = json!({
            "user": ctx.user_properties,
            "workspaceId": ctx.workspace_id,
            "identifierKey": ctx.identifier_key,
            "subscriptionGroupId": ctx.subscription_group_id,
            "tags": ctx.tags,
            "secrets": ctx.secrets,
        });
        self.registry
            .render_template(template, &data)
            .map_err(|err| err.to_string())
    }

    /// Renders every named field independently; fields whose source template
    /// is absent are skipped and appear in no output. The first failure wins.
    pub fn render_fields(
        &self,
        fields: &[(&str, Option<&str>)],
        ctx: &RenderContext<'_>,
    ) -> Result<BTreeMap<String, String>, RenderFieldError> {
        let mut rendered = BTreeMap::new();
        for (name, template) in fields {
            let Some(template) = template else {
                continue;
            };
            match self.render(template, ctx) {
                Ok(value) => {
                    rendered.insert(name.to_string(), value);
                }
                Err(error) => {
                    return Err(RenderFieldError {
                        field: name.to_string(),
                        error,
                    });
                }
            }
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props() -> UserPropertyAssignments {
        let mut map = UserPropertyAssignments::new();
        map.insert("firstName".into(), json!("Ada"));
        map.insert("email".into(), json!("ada@example.com"));
        map
    }

    #[test]
    fn renders_user_properties() {
        let props = props();
        let ctx = RenderContext::new(&props, Uuid::new_v4());
        let renderer = Renderer::new();
        let out = renderer
            .render("Hello {{ user.firstName }}!", &ctx)
            .unwrap();
        assert_eq!(out, "Hello Ada!");
    }

    #[test]
    fn render_fields_is_fail_fast_and_field_tagged() {
        let props = props();
        let ctx = RenderContext::new(&props, Uuid::new_v4());
        let renderer = Renderer::new();
        let err = renderer
            .render_fields(
                &[
                    ("subject", Some("Hi {{ user.firstName }}")),
                    ("body", Some("{{#if}}broken{{/if}}")),
                    ("from", Some("support@example.com")),
                ],
                &ctx,
            )
            .unwrap_err();
        assert_eq!(err.field, "body");
        assert!(!err.error.is_empty());
    }

    #[test]
    fn absent_templates_are_skipped() {
        let props = props();
        let ctx = RenderContext::new(&props, Uuid::new_v4());
        let renderer = Renderer::new();
        let rendered = renderer
            .render_fields(&[("subject", Some("s")), ("replyTo", None)], &ctx)
            .unwrap();
        assert_eq!(rendered.len(), 1);
        assert!(!rendered.contains_key("replyTo"));
    }

    #[test]
    fn secrets_are_reachable_from_templates() {
        let props = props();
        let mut ctx = RenderContext::new(&props, Uuid::new_v4());
        ctx.secrets
            .insert("subscription-secret".into(), "shh".into());
        let renderer = Renderer::new();
        let out = renderer
            .render("key={{ lookup secrets \"subscription-secret\" }}", &ctx)
            .unwrap();
        assert_eq!(out, "key=shh");
    }
}
