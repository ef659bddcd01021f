//! Side-effect intents derived from a finalized flow response.
//!
//! An intent says *what* should happen downstream; the
//! [`SideEffectCoordinator`](crate::SideEffectCoordinator) decides how.
//! Intents are dispatched once and never retried.

use chrono::{DateTime, Utc};
use healthflow_core::flow::{FlowKind, OperationalMetrics};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    Appointment,
    Reminder,
    FollowUp,
}

impl NotificationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationCategory::Appointment => "appointment",
            NotificationCategory::Reminder => "reminder",
            NotificationCategory::FollowUp => "follow_up",
        }
    }
}

/// A routine, dismissible notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub category: NotificationCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deep_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn new(category: NotificationCategory, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            category,
            deep_link: None,
            expires_at: None,
        }
    }

    pub fn with_deep_link(mut self, link: impl Into<String>) -> Self {
        self.deep_link = Some(link.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Physical emergency detected by the symptom assistant
    Emergency,
    /// Crisis language detected by the mental-health companion
    Crisis,
}

/// A high-priority alert. Never dismissible, never batched with routine
/// notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyAlert {
    pub kind: AlertKind,
    pub flow: FlowKind,
    pub title: String,
    pub message: String,
    pub dismissible: bool,
}

impl EmergencyAlert {
    pub fn new(kind: AlertKind, flow: FlowKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            flow,
            title: title.into(),
            message: message.into(),
            dismissible: false,
        }
    }
}

/// A delayed check-in requested by a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpRequest {
    pub flow: FlowKind,
    pub delay_hours: f64,
    pub check_in_message: String,
}

impl FollowUpRequest {
    /// Longest check-in delay accepted from a flow, one year.
    pub const MAX_DELAY_HOURS: f64 = 24.0 * 365.0;

    /// When the check-in falls due, counted from `now`. `None` if the delay
    /// is outside `0..=MAX_DELAY_HOURS` or not a number.
    pub fn due_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !(0.0..=Self::MAX_DELAY_HOURS).contains(&self.delay_hours) {
            return None;
        }
        let delay = chrono::Duration::try_minutes((self.delay_hours * 60.0).round() as i64)?;
        now.checked_add_signed(delay)
    }
}

/// What should happen after a response is returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SideEffectIntent {
    Notify {
        user_id: Option<String>,
        notification: Notification,
    },
    EmergencyAlert {
        user_id: Option<String>,
        alert: EmergencyAlert,
    },
    ScheduleFollowUp {
        user_id: Option<String>,
        follow_up: FollowUpRequest,
    },
    AuditMetricsReference {
        user_id: Option<String>,
        flow: FlowKind,
        referenced: Vec<String>,
    },
}

impl SideEffectIntent {
    pub fn kind(&self) -> &'static str {
        match self {
            SideEffectIntent::Notify { .. } => "notify",
            SideEffectIntent::EmergencyAlert { .. } => "emergency_alert",
            SideEffectIntent::ScheduleFollowUp { .. } => "schedule_follow_up",
            SideEffectIntent::AuditMetricsReference { .. } => "audit_metrics_reference",
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            SideEffectIntent::Notify { user_id, .. }
            | SideEffectIntent::EmergencyAlert { user_id, .. }
            | SideEffectIntent::ScheduleFollowUp { user_id, .. }
            | SideEffectIntent::AuditMetricsReference { user_id, .. } => user_id.as_deref(),
        }
    }
}

/// Which operational metrics from the request the output text echoes back.
///
/// A count is referenced when the text talks about escalations and contains
/// that number; a timestamp is referenced when its date appears verbatim.
pub fn referenced_metrics(text: &str, metrics: &OperationalMetrics) -> Vec<String> {
    let lowered = text.to_lowercase();
    let talks_about_escalations = lowered.contains("escalat");
    let numbers: Vec<u32> = text
        .split(|c: char| !c.is_ascii_digit())
        .filter_map(|n| n.parse().ok())
        .collect();

    let mut out = Vec::new();
    if talks_about_escalations {
        if let Some(n) = metrics.escalations_30d.filter(|n| numbers.contains(n)) {
            out.push(format!("escalations30d={n}"));
        }
        if let Some(n) = metrics.open_escalations.filter(|n| numbers.contains(n)) {
            out.push(format!("openEscalations={n}"));
        }
    }
    if let Some(last) = &metrics.last_escalation_at {
        let date = last.get(..10).unwrap_or(last);
        if !date.is_empty() && text.contains(date) {
            out.push(format!("lastEscalationAt={last}"));
        }
    }
    out
}
