//! In-memory stand-ins for the user and template services, selected with
//! `USE_MOCK_SERVICES`. Behaviour is keyed off the identifiers passed in so
//! that error paths can be driven without live dependencies:
//!
//! - user ids starting with `error_` or `unavailable_` yield a 503, `notfound_`
//!   a 404, `timeout_` hangs for five seconds and then fails
//! - user ids containing `no_notifications`, `opted_out`, `email_opt_out`,
//!   `push_opt_out`, `no_email`, `unverified`, `no_push`, `no_devices`,
//!   `email_only` or `push_only` get the matching preferences
//! - template codes starting with `notfound_`, `unavailable_` or `timeout_`
//!   behave the same way; a missing required variable yields a 422

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::time::sleep;
use tracing::debug;

use crate::{
    clients::{
        template::{TEMPLATE_SERVICE, TemplateClient},
        user::{USER_SERVICE, UserPreferencesClient},
    },
    context::RequestContext,
    error::ClientError,
    models::{
        preferences::UserPreferences,
        template::{RenderResponse, RenderedContent, Template, TemplateBody, TemplateVariable},
    },
};

const SIMULATED_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
pub struct MockUserClient {
    request_count: AtomicU32,
}

impl MockUserClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_count(&self) -> u32 {
        self.request_count.load(Ordering::SeqCst)
    }

    fn preferences_for(user_id: &str) -> UserPreferences {
        let mut prefs = UserPreferences {
            user_id: user_id.to_string(),
            notification_enabled: true,
            opted_out: false,
            opted_out_channels: HashMap::new(),
            email_enabled: true,
            push_enabled: true,
            email_verified: true,
            email: Some(format!("{}@example.com", user_id)),
            device_tokens: vec![format!("device_{}", user_id)],
            language: None,
        };

        if user_id.contains("no_notifications") {
            prefs.notification_enabled = false;
        }
        if user_id.contains("opted_out") {
            prefs.opted_out = true;
        }
        for channel in ["email", "push"] {
            if user_id.contains(&format!("{}_opt_out", channel)) {
                prefs.opted_out_channels.insert(channel.to_string(), true);
            }
        }
        if user_id.contains("no_email") || user_id.contains("push_only") {
            prefs.email_enabled = false;
        }
        if user_id.contains("no_push") || user_id.contains("email_only") {
            prefs.push_enabled = false;
        }
        if user_id.contains("unverified") {
            prefs.email_verified = false;
        }
        if user_id.contains("no_devices") {
            prefs.device_tokens.clear();
        }

        prefs
    }
}

#[async_trait]
impl UserPreferencesClient for MockUserClient {
    async fn get_preferences(
        &self,
        ctx: &RequestContext,
        user_id: &str,
    ) -> Result<UserPreferences, ClientError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);

        ctx.guard(simulate(USER_SERVICE, user_id))
            .await??;

        debug!(user_id, "Returning in-memory user preferences");
        Ok(Self::preferences_for(user_id))
    }

    async fn record_notification_sent(
        &self,
        _ctx: &RequestContext,
        user_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(), ClientError> {
        debug!(user_id, sent_at = %sent_at, "Recorded last notification time in memory");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MockTemplateClient {
    request_count: AtomicU32,
}

impl MockTemplateClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_count(&self) -> u32 {
        self.request_count.load(Ordering::SeqCst)
    }

    fn lookup(template_code: &str, language: &str) -> Result<Template, ClientError> {
        let (name, version, subject, html, text, variables) = match template_code {
            "welcome_email" => (
                "Welcome Email",
                "2.3.0",
                "Welcome, {{name}}!",
                Some("<html><body><h1>Welcome {{name}}!</h1><p>Thank you for joining {{app_name}}.</p></body></html>"),
                "Welcome {{name}}!\n\nThank you for joining {{app_name}}.",
                vec![("name", true), ("app_name", false)],
            ),
            "password_reset" => (
                "Password Reset",
                "1.5.2",
                "Reset your password",
                Some("<html><body><p>Reset your password: <a href=\"{{reset_url}}\">{{reset_url}}</a></p></body></html>"),
                "Reset your password: {{reset_url}}",
                vec![("reset_url", true)],
            ),
            "order_confirmation" => (
                "Order Confirmation",
                "3.1.0",
                "Order #{{order_id}} confirmed",
                Some("<html><body><p>Hi {{name}}, order #{{order_id}} totalling {{order_total}} is confirmed.</p></body></html>"),
                "Hi {{name}}, order #{{order_id}} totalling {{order_total}} is confirmed.",
                vec![("name", true), ("order_id", true), ("order_total", true)],
            ),
            "push_notification" => (
                "Push Notification",
                "1.0.0",
                "{{title}}",
                None,
                "{{message}}",
                vec![("title", true), ("message", true)],
            ),
            _ => {
                return Err(ClientError::Status {
                    service: TEMPLATE_SERVICE,
                    status: 404,
                    body: format!("template not found: {}", template_code),
                });
            }
        };

        Ok(Template {
            template_id: template_code.to_string(),
            name: name.to_string(),
            language: language.to_string(),
            version: Some(version.to_string()),
            subject: Some(subject.to_string()),
            body: TemplateBody {
                html: html.map(str::to_string),
                text: text.to_string(),
            },
            variables: variables
                .into_iter()
                .map(|(name, required)| TemplateVariable {
                    name: name.to_string(),
                    required,
                })
                .collect(),
        })
    }
}

#[async_trait]
impl TemplateClient for MockTemplateClient {
    async fn render_template(
        &self,
        ctx: &RequestContext,
        template_code: &str,
        language: &str,
        variables: &HashMap<String, JsonValue>,
    ) -> Result<RenderResponse, ClientError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);

        ctx.guard(simulate(TEMPLATE_SERVICE, template_code))
            .await??;

        let template = Self::lookup(template_code, language)?;

        if let Some(missing) = template
            .variables
            .iter()
            .find(|v| v.required && !variables.contains_key(&v.name))
        {
            return Err(ClientError::Status {
                service: TEMPLATE_SERVICE,
                status: 422,
                body: format!("missing required variable: {}", missing.name),
            });
        }

        let mut values = variables.clone();
        for optional in template.variables.iter().filter(|v| !v.required) {
            values
                .entry(optional.name.clone())
                .or_insert(JsonValue::Null);
        }

        let mut variables_used: Vec<String> = variables.keys().cloned().collect();
        variables_used.sort();

        debug!(template_code, language, "Rendered template in memory");

        Ok(RenderResponse {
            template_id: template.template_id,
            language: language.to_string(),
            version: template.version.unwrap_or_else(|| "latest".to_string()),
            rendered: RenderedContent {
                subject: template
                    .subject
                    .as_deref()
                    .map(|s| replace_variables(s, &values)),
                body: TemplateBody {
                    html: template
                        .body
                        .html
                        .as_deref()
                        .map(|h| replace_variables(h, &values)),
                    text: replace_variables(&template.body.text, &values),
                },
            },
            rendered_at: Utc::now(),
            variables_used,
        })
    }

    async fn get_template(
        &self,
        ctx: &RequestContext,
        template_code: &str,
        language: &str,
    ) -> Result<Template, ClientError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);

        ctx.guard(simulate(TEMPLATE_SERVICE, template_code))
            .await??;

        Self::lookup(template_code, language)
    }
}

async fn simulate(service: &'static str, key: &str) -> Result<(), ClientError> {
    if key.starts_with("error_") || key.starts_with("unavailable_") {
        return Err(ClientError::Status {
            service,
            status: 503,
            body: format!("service temporarily down: {}", key),
        });
    }

    if key.starts_with("notfound_") {
        return Err(ClientError::Status {
            service,
            status: 404,
            body: format!("not found: {}", key),
        });
    }

    if key.starts_with("timeout_") {
        sleep(SIMULATED_TIMEOUT).await;
        return Err(ClientError::Transport {
            service,
            message: "request timed out".to_string(),
        });
    }

    Ok(())
}

/// Substitutes `{{name}}` placeholders. Strings are inserted verbatim, null
/// becomes empty and any other value its JSON form.
pub fn replace_variables(template: &str, variables: &HashMap<String, JsonValue>) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);

        let replacement = match value {
            JsonValue::String(s) => s.clone(),
            JsonValue::Null => String::new(),
            other => other.to_string(),
        };

        result = result.replace(&placeholder, &replacement);
    }

    result
}
