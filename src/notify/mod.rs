//! Alert delivery.
//!
//! The [`Notifier`] makes exactly one delivery attempt per alert and never
//! returns an error: a failed attempt is recorded on the alert itself and
//! logged. Every alert, delivered or not, lands in a bounded in-memory log.

mod webhook;

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;
pub use webhook::*;

use crate::{
    clock::Clock,
    config::NotificationsConfig,
    models::{Alert, AlertDraft, AlertSeverity},
    observability::metrics,
};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// A destination for alerts.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Name recorded on each alert.
    fn name(&self) -> &str;

    async fn deliver(&self, alert: &Alert) -> Result<(), DeliveryError>;
}

/// Writes alerts to the log and nowhere else.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogChannel;

#[async_trait]
impl AlertChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), DeliveryError> {
        match alert.severity {
            AlertSeverity::Critical | AlertSeverity::Warning => tracing::warn!(
                alert_id = %alert.id,
                severity = ?alert.severity,
                subject = %alert.subject,
                body = %alert.body,
                "Alert"
            ),
            AlertSeverity::Info => tracing::info!(
                alert_id = %alert.id,
                subject = %alert.subject,
                body = %alert.body,
                "Alert"
            ),
        }
        Ok(())
    }
}

/// Pick the channel named in configuration.
pub fn build_channel(config: &NotificationsConfig) -> Arc<dyn AlertChannel> {
    match &config.webhook {
        Some(webhook) => Arc::new(WebhookChannel::from_config(
            reqwest::Client::new(),
            webhook,
            &config.sender,
            &config.recipients,
        )),
        None => Arc::new(LogChannel),
    }
}

pub struct Notifier {
    channel: Arc<dyn AlertChannel>,
    clock: Arc<dyn Clock>,
    log: RwLock<VecDeque<Alert>>,
    capacity: usize,
}

impl Notifier {
    pub fn new(channel: Arc<dyn AlertChannel>, clock: Arc<dyn Clock>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            channel,
            clock,
            log: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn channel_name(&self) -> &str {
        self.channel.name()
    }

    /// Deliver `draft` once and return the sealed alert.
    pub async fn send(&self, draft: AlertDraft) -> Alert {
        let mut alert = Alert {
            id: Uuid::new_v4(),
            severity: draft.severity,
            subject: draft.subject,
            body: draft.body,
            triggered_by_run_id: draft.triggered_by_run_id,
            sent_at: self.clock.now(),
            channel: self.channel.name().to_string(),
            delivery_error: None,
        };

        if let Err(e) = self.channel.deliver(&alert).await {
            tracing::warn!(
                alert_id = %alert.id,
                channel = %alert.channel,
                subject = %alert.subject,
                error = %e,
                "Alert delivery failed"
            );
            alert.delivery_error = Some(e.to_string());
        } else {
            tracing::debug!(alert_id = %alert.id, channel = %alert.channel, "Alert delivered");
        }

        metrics::record_alert(
            &alert.channel,
            severity_label(alert.severity),
            alert.delivered(),
        );

        {
            let mut log = self.log.write();
            if log.len() == self.capacity {
                log.pop_front();
            }
            log.push_back(alert.clone());
        }

        alert
    }

    /// Sent alerts, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.log.read().iter().rev().take(limit).cloned().collect()
    }
}

fn severity_label(severity: AlertSeverity) -> &'static str {
    match severity {
        AlertSeverity::Info => "info",
        AlertSeverity::Warning => "warning",
        AlertSeverity::Critical => "critical",
    }
}
