//! Side-effect coordinator.
//!
//! Takes the intents derived from a finalized response and hands each one to
//! the right sink. Follow-up persistence is awaited so the job exists before
//! the response is returned; notifications, alerts and audit writes run in
//! the background and never delay or alter the response.

use crate::audit::{AuditEvent, AuditLogger, AuditOutcome, TracingSink};
use crate::intent::SideEffectIntent;
use crate::notify::{AlertSink, NotificationSink, sinks_from_config};
use crate::store::{FollowUpJob, InMemoryJobStore, JobStore, SqliteJobStore};
use chrono::Utc;
use healthflow_config::AppConfig;
use healthflow_core::error::StoreError;
use healthflow_core::event::{DomainEvent, EventBus};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// User id recorded for alerts raised on behalf of an anonymous caller.
pub const ANONYMOUS_USER: &str = "anonymous";

/// What [`SideEffectCoordinator::dispatch`] did.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// One short line per intent, e.g. `"notify:appointment"`.
    pub descriptions: Vec<String>,
    /// Background deliveries. Callers may await these; nothing requires it.
    pub handles: Vec<JoinHandle<()>>,
}

impl DispatchReport {
    /// Wait for every background delivery to finish.
    pub async fn join(self) -> Vec<String> {
        for handle in self.handles {
            let _ = handle.await;
        }
        self.descriptions
    }
}

pub struct SideEffectCoordinator {
    notifier: Arc<dyn NotificationSink>,
    alerts: Arc<dyn AlertSink>,
    store: Arc<dyn JobStore>,
    audit: Arc<AuditLogger>,
    event_bus: Option<Arc<EventBus>>,
}

impl SideEffectCoordinator {
    pub fn new(
        notifier: Arc<dyn NotificationSink>,
        alerts: Arc<dyn AlertSink>,
        store: Arc<dyn JobStore>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            notifier,
            alerts,
            store,
            audit,
            event_bus: None,
        }
    }

    /// Sinks that only log, with a volatile job store.
    pub fn in_memory() -> Self {
        let tracing = Arc::new(crate::notify::TracingNotifier);
        Self::new(
            tracing.clone(),
            tracing,
            Arc::new(InMemoryJobStore::new()),
            Arc::new(AuditLogger::with_sinks(vec![Box::new(TracingSink)])),
        )
    }

    /// Build sinks and the SQLite job store from config.
    pub async fn from_config(config: &AppConfig) -> Result<Self, StoreError> {
        let (notifier, alerts) = sinks_from_config(&config.notifications);
        let path = config.store.resolved_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Storage(format!("Cannot create {}: {e}", parent.display())))?;
        }
        let store = SqliteJobStore::new(&format!("sqlite://{}", path.display())).await?;
        Ok(Self::new(
            notifier,
            alerts,
            Arc::new(store),
            Arc::new(AuditLogger::with_sinks(vec![Box::new(TracingSink)])),
        ))
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    pub fn notifier(&self) -> Arc<dyn NotificationSink> {
        self.notifier.clone()
    }

    pub fn audit(&self) -> Arc<AuditLogger> {
        self.audit.clone()
    }

    /// Hand off every intent. Delivery failures are logged, never returned.
    pub async fn dispatch(&self, intents: Vec<SideEffectIntent>) -> DispatchReport {
        let mut report = DispatchReport::default();

        for intent in intents {
            let kind = intent.kind();
            let user_id = intent.user_id().map(str::to_string);

            let description = match intent {
                SideEffectIntent::Notify { user_id, notification } => {
                    let Some(user_id) = user_id else {
                        debug!(category = notification.category.as_str(), "Skipping notification for anonymous user");
                        continue;
                    };
                    let description = format!("notify:{}", notification.category.as_str());
                    let notifier = self.notifier.clone();
                    report.handles.push(tokio::spawn(async move {
                        if let Err(e) = notifier.create(&user_id, &notification).await {
                            warn!(user_id = %user_id, error = %e, "Notification delivery failed");
                        }
                    }));
                    description
                }

                SideEffectIntent::EmergencyAlert { user_id, alert } => {
                    let user_id = user_id.unwrap_or_else(|| ANONYMOUS_USER.to_string());
                    let description = format!("alert:{}", alert.flow);
                    let alerts = self.alerts.clone();
                    let audit = self.audit.clone();
                    report.handles.push(tokio::spawn(async move {
                        let outcome = match alerts.raise(&user_id, &alert).await {
                            Ok(()) => (AuditOutcome::Success, None),
                            Err(e) => {
                                warn!(user_id = %user_id, error = %e, "Emergency alert delivery failed");
                                (AuditOutcome::Failure, Some(e.to_string()))
                            }
                        };
                        audit.log(AuditEvent::AlertRaised { flow: alert.flow }, &user_id, outcome.0, outcome.1);
                    }));
                    description
                }

                SideEffectIntent::ScheduleFollowUp { user_id, follow_up } => {
                    let Some(user_id) = user_id else {
                        debug!(flow = %follow_up.flow, "Skipping follow-up for anonymous user");
                        continue;
                    };
                    let Some(due_at) = follow_up.due_at(Utc::now()) else {
                        warn!(user_id = %user_id, delay_hours = follow_up.delay_hours, "Follow-up delay out of range");
                        self.audit.log(
                            AuditEvent::FollowUpScheduled { key: String::new() },
                            &user_id,
                            AuditOutcome::Failure,
                            Some(format!("delay of {} hours is out of range", follow_up.delay_hours)),
                        );
                        report.descriptions.push("follow_up:rejected".to_string());
                        continue;
                    };
                    let job = FollowUpJob::new(&user_id, follow_up.flow, due_at, &follow_up.check_in_message);
                    let (outcome, details) = match self.store.schedule(&job).await {
                        Ok(true) => (AuditOutcome::Success, None),
                        Ok(false) => (AuditOutcome::Skipped, Some("already scheduled".to_string())),
                        Err(e) => {
                            warn!(user_id = %user_id, error = %e, "Follow-up could not be persisted");
                            (AuditOutcome::Failure, Some(e.to_string()))
                        }
                    };
                    self.audit
                        .log(AuditEvent::FollowUpScheduled { key: job.key.clone() }, &user_id, outcome, details);
                    format!("follow_up:{}", job.due_at.to_rfc3339())
                }

                SideEffectIntent::AuditMetricsReference { user_id, flow, referenced } => {
                    let user_id = user_id.unwrap_or_else(|| ANONYMOUS_USER.to_string());
                    let description = format!("audit:{}", referenced.join(","));
                    self.audit.log(
                        AuditEvent::MetricsReferenced { flow, metrics: referenced },
                        &user_id,
                        AuditOutcome::Success,
                        None,
                    );
                    description
                }
            };

            if let Some(bus) = &self.event_bus {
                bus.publish(DomainEvent::SideEffectDispatched {
                    kind: kind.to_string(),
                    user_id,
                    timestamp: Utc::now(),
                });
            }
            report.descriptions.push(description);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{AlertKind, EmergencyAlert, FollowUpRequest, Notification, NotificationCategory};
    use crate::notify::InMemoryNotifier;
    use healthflow_core::flow::FlowKind;

    fn coordinator() -> (SideEffectCoordinator, Arc<InMemoryNotifier>, Arc<InMemoryJobStore>, Arc<AuditLogger>) {
        let sink = Arc::new(InMemoryNotifier::new());
        let store = Arc::new(InMemoryJobStore::new());
        let audit = Arc::new(AuditLogger::new());
        let coordinator = SideEffectCoordinator::new(sink.clone(), sink.clone(), store.clone(), audit.clone());
        (coordinator, sink, store, audit)
    }

    fn follow_up(user: Option<&str>) -> SideEffectIntent {
        SideEffectIntent::ScheduleFollowUp {
            user_id: user.map(String::from),
            follow_up: FollowUpRequest {
                flow: FlowKind::MentalHealth,
                delay_hours: 24.0,
                check_in_message: "How are you feeling today?".into(),
            },
        }
    }

    #[tokio::test]
    async fn notifications_are_delivered_in_background() {
        let (coordinator, sink, _, _) = coordinator();
        let report = coordinator
            .dispatch(vec![SideEffectIntent::Notify {
                user_id: Some("u1".into()),
                notification: Notification::new(NotificationCategory::Appointment, "Booked", "Tuesday 10:00"),
            }])
            .await;

        assert_eq!(report.handles.len(), 1);
        let descriptions = report.join().await;
        assert_eq!(descriptions, vec!["notify:appointment"]);
        assert_eq!(sink.notifications().len(), 1);
    }

    #[tokio::test]
    async fn follow_up_is_persisted_before_dispatch_returns() {
        let (coordinator, _, store, audit) = coordinator();
        let report = coordinator.dispatch(vec![follow_up(Some("u1"))]).await;

        assert!(report.handles.is_empty());
        assert_eq!(store.pending_count().await.unwrap(), 1);
        assert_eq!(audit.entries_by_outcome(&AuditOutcome::Success).len(), 1);
        assert!(report.descriptions[0].starts_with("follow_up:"));
    }

    #[tokio::test]
    async fn out_of_range_follow_up_delay_is_rejected() {
        let (coordinator, _, store, audit) = coordinator();
        let intent = SideEffectIntent::ScheduleFollowUp {
            user_id: Some("u1".into()),
            follow_up: FollowUpRequest {
                flow: FlowKind::Lifestyle,
                delay_hours: 1e12,
                check_in_message: "Still on track?".into(),
            },
        };

        let report = coordinator.dispatch(vec![intent]).await;

        assert_eq!(report.descriptions, vec!["follow_up:rejected"]);
        assert_eq!(store.pending_count().await.unwrap(), 0);
        let failures = audit.entries_by_outcome(&AuditOutcome::Failure);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].user_id, "u1");
    }

    #[tokio::test]
    async fn anonymous_users_get_no_notifications_or_follow_ups() {
        let (coordinator, sink, store, _) = coordinator();
        let report = coordinator
            .dispatch(vec![
                SideEffectIntent::Notify {
                    user_id: None,
                    notification: Notification::new(NotificationCategory::Reminder, "Reminder", "Walk"),
                },
                follow_up(None),
            ])
            .await;

        assert!(report.join().await.is_empty());
        assert!(sink.notifications().is_empty());
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn alerts_are_raised_even_for_anonymous_users() {
        let (coordinator, sink, _, audit) = coordinator();
        let report = coordinator
            .dispatch(vec![SideEffectIntent::EmergencyAlert {
                user_id: None,
                alert: EmergencyAlert::new(AlertKind::Emergency, FlowKind::Symptom, "Emergency", "Call 911"),
            }])
            .await;
        report.join().await;

        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].0, ANONYMOUS_USER);
        assert!(sink.notifications().is_empty());
        assert_eq!(audit.count(), 1);
    }

    #[tokio::test]
    async fn metrics_references_are_audited() {
        let (coordinator, _, _, audit) = coordinator();
        coordinator
            .dispatch(vec![SideEffectIntent::AuditMetricsReference {
                user_id: Some("u1".into()),
                flow: FlowKind::MentalHealth,
                referenced: vec!["escalations30d=4".into()],
            }])
            .await;

        let entries = audit.entries();
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0].event, AuditEvent::MetricsReferenced { .. }));
    }

    #[tokio::test]
    async fn dispatch_publishes_events() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let (coordinator, _, _, _) = coordinator();
        let coordinator = coordinator.with_event_bus(bus);

        coordinator.dispatch(vec![follow_up(Some("u1"))]).await;

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::SideEffectDispatched { kind, user_id, .. } => {
                assert_eq!(kind, "schedule_follow_up");
                assert_eq!(user_id.as_deref(), Some("u1"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
