use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::instrument;

use super::{AlertChannel, DeliveryError};
use crate::{config::WebhookConfig, models::Alert};

/// Posts alerts as JSON to an HTTP endpoint.
///
/// Any 2xx response counts as delivered. Everything else, including a
/// timeout, is a [`DeliveryError`].
pub struct WebhookChannel {
    client: Client,
    url: String,
    api_key: Option<String>,
    headers: HashMap<String, String>,
    timeout: Duration,
    sender: String,
    recipients: Vec<String>,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    #[serde(flatten)]
    alert: &'a Alert,
    sender: &'a str,
    recipients: &'a [String],
}

impl WebhookChannel {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            api_key: None,
            headers: HashMap::new(),
            timeout: Duration::from_millis(5000),
            sender: "vigil".to_string(),
            recipients: Vec::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout = Duration::from_millis(timeout_ms);
        self
    }

    /// Sender and addressees placed in every payload.
    pub fn with_addressing(mut self, sender: impl Into<String>, recipients: Vec<String>) -> Self {
        self.sender = sender.into();
        self.recipients = recipients;
        self
    }

    pub fn from_config(
        client: Client,
        config: &WebhookConfig,
        sender: &str,
        recipients: &[String],
    ) -> Self {
        let mut channel = Self::new(client, &config.url)
            .with_headers(config.headers.clone())
            .with_timeout_ms(config.timeout_ms)
            .with_addressing(sender, recipients.to_vec());

        if let Some(ref api_key) = config.api_key {
            channel = channel.with_api_key(api_key);
        }

        channel
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    #[instrument(skip(self, alert), fields(url = %self.url, alert_id = %alert.id))]
    async fn deliver(&self, alert: &Alert) -> Result<(), DeliveryError> {
        let payload = WebhookPayload {
            alert,
            sender: &self.sender,
            recipients: &self.recipients,
        };

        let mut req_builder = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&payload);

        if let Some(ref api_key) = self.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", api_key));
        }

        for (key, value) in &self.headers {
            req_builder = req_builder.header(key, value);
        }

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                DeliveryError::Timeout(self.timeout.as_millis() as u64)
            } else {
                DeliveryError::Transport(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body: error_text,
            });
        }

        Ok(())
    }
}
