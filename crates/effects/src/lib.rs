//! Side effects of a finalized flow response.
//!
//! Flows describe what should happen next as [`SideEffectIntent`]s; the
//! [`SideEffectCoordinator`] delivers them to notification sinks, the alert
//! channel, the durable follow-up store and the audit log.

pub mod audit;
pub mod coordinator;
pub mod intent;
pub mod notify;
pub mod store;
pub mod worker;

pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use coordinator::{ANONYMOUS_USER, DispatchReport, SideEffectCoordinator};
pub use intent::{
    AlertKind, EmergencyAlert, FollowUpRequest, Notification, NotificationCategory, SideEffectIntent, referenced_metrics,
};
pub use notify::{AlertSink, InMemoryNotifier, NotificationSink, TracingNotifier, WebhookNotifier};
pub use store::{FollowUpJob, InMemoryJobStore, JobStatus, JobStore, SqliteJobStore, job_key};
pub use worker::FollowUpWorker;
