use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVariable {
    pub name: String,

    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub template_id: String,
    pub name: String,
    pub language: String,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub subject: Option<String>,

    pub body: TemplateBody,

    #[serde(default)]
    pub variables: Vec<TemplateVariable>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderRequest<'a> {
    pub language: &'a str,
    pub version: &'a str,
    pub variables: &'a HashMap<String, JsonValue>,
    pub preview_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateBody {
    #[serde(default)]
    pub html: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedContent {
    #[serde(default)]
    pub subject: Option<String>,
    pub body: TemplateBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderResponse {
    pub template_id: String,
    pub language: String,
    pub version: String,
    pub rendered: RenderedContent,
    pub rendered_at: DateTime<Utc>,

    #[serde(default)]
    pub variables_used: Vec<String>,
}
