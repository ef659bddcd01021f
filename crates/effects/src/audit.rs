//! Audit trail for sensitive side effects.
//!
//! Records when a response referenced operational metrics, when an alert was
//! raised, and what happened to scheduled follow-ups.

use chrono::{DateTime, Utc};
use healthflow_core::flow::FlowKind;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    pub user_id: String,
    pub outcome: AuditOutcome,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A response mentioned operational metrics supplied by the caller
    MetricsReferenced { flow: FlowKind, metrics: Vec<String> },
    /// An emergency or crisis alert was raised
    AlertRaised { flow: FlowKind },
    /// A follow-up was handed to the job store
    FollowUpScheduled { key: String },
    /// A due follow-up was delivered (or failed to be)
    FollowUpDelivered { key: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Skipped,
}

/// Where audit entries are written.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Keeps entries in memory and forwards each one to its sinks.
pub struct AuditLogger {
    entries: Mutex<Vec<AuditEntry>>,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entry_count", &self.count())
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    pub fn new() -> Self {
        Self::with_sinks(Vec::new())
    }

    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            sinks,
        }
    }

    pub fn log(&self, event: AuditEvent, user_id: &str, outcome: AuditOutcome, details: Option<String>) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event,
            user_id: user_id.into(),
            outcome,
            details,
        };

        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());

        for sink in &self.sinks {
            sink.record(&entry);
        }
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn entries_by_outcome(&self, outcome: &AuditOutcome) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| &e.outcome == outcome)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Writes entries through `tracing`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        tracing::info!(
            event = ?entry.event,
            user_id = %entry.user_id,
            outcome = ?entry.outcome,
            details = ?entry.details,
            "AUDIT"
        );
    }
}
