use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::notification::NotificationType;

fn default_true() -> bool {
    true
}

/// Preferences returned by the user service. Only `email_enabled` and
/// `push_enabled` are guaranteed; the rest fall back to permissive defaults
/// except the device list, which doubles as the push recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default)]
    pub user_id: String,

    #[serde(default = "default_true")]
    pub notification_enabled: bool,

    #[serde(default)]
    pub opted_out: bool,

    /// Per-channel opt-outs keyed by channel name (`email`, `push`).
    #[serde(default)]
    pub opted_out_channels: HashMap<String, bool>,

    pub email_enabled: bool,
    pub push_enabled: bool,

    #[serde(default = "default_true")]
    pub email_verified: bool,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub device_tokens: Vec<String>,

    #[serde(default)]
    pub language: Option<String>,
}

impl UserPreferences {
    pub fn is_opted_out(&self, channel: NotificationType) -> bool {
        self.opted_out
            || self
                .opted_out_channels
                .get(channel.as_str())
                .copied()
                .unwrap_or(false)
    }
}
