use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// An alert before delivery.
#[derive(Debug, Clone)]
pub struct AlertDraft {
    pub severity: AlertSeverity,
    pub subject: String,
    pub body: String,
    pub triggered_by_run_id: Option<Uuid>,
}

impl AlertDraft {
    pub fn new(severity: AlertSeverity, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            severity,
            subject: subject.into(),
            body: body.into(),
            triggered_by_run_id: None,
        }
    }

    pub fn for_run(mut self, run_id: Uuid) -> Self {
        self.triggered_by_run_id = Some(run_id);
        self
    }
}

/// A delivered (or attempted) alert. Produced once by the notifier and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub severity: AlertSeverity,
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by_run_id: Option<Uuid>,
    pub sent_at: DateTime<Utc>,
    /// Channel the delivery was attempted on.
    pub channel: String,
    /// Set when the delivery attempt failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_error: Option<String>,
}

impl Alert {
    pub fn delivered(&self) -> bool {
        self.delivery_error.is_none()
    }
}
