use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Alert delivery configuration.
///
/// ```toml
/// [notifications]
/// sender = "vigil@example.com"
/// recipients = ["ops@example.com"]
/// notify_on_failure = true
///
/// [notifications.webhook]
/// url = "https://alerts.example.com/hooks/vigil"
/// api_key = "${ALERT_WEBHOOK_KEY}"
/// timeout_ms = 5000
///
/// [notifications.webhook.headers]
/// X-Team = "storage"
/// ```
///
/// Without a `webhook` table alerts are only written to the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,

    /// Sender identity placed in the payload.
    #[serde(default = "default_sender")]
    pub sender: String,

    /// Addressees placed in the payload.
    #[serde(default)]
    pub recipients: Vec<String>,

    /// Send a summary after a successful routine job.
    #[serde(default)]
    pub notify_on_success: bool,

    /// Send a summary after a failed routine job.
    #[serde(default = "default_true")]
    pub notify_on_failure: bool,

    /// Number of sent alerts kept for inspection.
    /// Default: 200
    #[serde(default = "default_alert_log_size")]
    pub alert_log_size: usize,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            webhook: None,
            sender: default_sender(),
            recipients: Vec::new(),
            notify_on_success: false,
            notify_on_failure: true,
            alert_log_size: default_alert_log_size(),
        }
    }
}

fn default_sender() -> String {
    "vigil".to_string()
}

fn default_true() -> bool {
    true
}

fn default_alert_log_size() -> usize {
    200
}

impl NotificationsConfig {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(webhook) = &self.webhook {
            webhook.validate()?;
        }
        if self.alert_log_size == 0 {
            return Err("notifications.alert_log_size must be at least 1".into());
        }
        Ok(())
    }
}

/// HTTP endpoint receiving alerts as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    /// Endpoint URL.
    pub url: String,

    /// Sent as a bearer token.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Custom headers to include in requests.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Request timeout in milliseconds.
    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_webhook_timeout_ms() -> u64 {
    5000
}

impl WebhookConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(format!(
                "notifications.webhook.url must be an http(s) URL, got '{}'",
                self.url
            ));
        }
        if self.timeout_ms == 0 {
            return Err("notifications.webhook.timeout_ms must be at least 1".into());
        }
        Ok(())
    }
}
