//! Follow-up delivery worker.
//!
//! Polls the job store for due check-ins and delivers each one as a
//! follow-up notification. A failed delivery is recorded and not retried.

use crate::audit::{AuditEvent, AuditLogger, AuditOutcome};
use crate::intent::{Notification, NotificationCategory};
use crate::notify::NotificationSink;
use crate::store::JobStore;
use chrono::Utc;
use healthflow_config::SchedulerConfig;
use healthflow_core::error::StoreError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct FollowUpWorker {
    store: Arc<dyn JobStore>,
    sink: Arc<dyn NotificationSink>,
    audit: Option<Arc<AuditLogger>>,
    poll_interval: Duration,
    batch_size: usize,
}

impl FollowUpWorker {
    pub fn new(store: Arc<dyn JobStore>, sink: Arc<dyn NotificationSink>, config: &SchedulerConfig) -> Self {
        Self {
            store,
            sink,
            audit: None,
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            batch_size: config.batch_size.max(1) as usize,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Deliver every job due now. Returns how many were delivered.
    ///
    /// Only the initial query can fail the batch. A job whose status cannot
    /// be written back is logged and the rest of the batch still runs.
    pub async fn run_once(&self) -> Result<usize, StoreError> {
        let due = self.store.due(Utc::now(), self.batch_size).await?;
        if due.is_empty() {
            return Ok(0);
        }
        debug!(count = due.len(), "Delivering due follow-ups");

        let mut delivered = 0;
        for job in due {
            let notification = Notification::new(NotificationCategory::FollowUp, "Checking in", &job.message)
                .with_deep_link(format!("/{}", job.flow));

            let outcome = match self.sink.create(&job.user_id, &notification).await {
                Ok(()) => {
                    delivered += 1;
                    info!(key = %job.key, flow = %job.flow, "Follow-up delivered");
                    match self.store.mark_delivered(&job.key).await {
                        Ok(()) => (AuditOutcome::Success, None),
                        Err(e) => {
                            warn!(key = %job.key, error = %e, "Delivered follow-up could not be marked");
                            (AuditOutcome::Success, Some(format!("not marked delivered: {e}")))
                        }
                    }
                }
                Err(e) => {
                    warn!(key = %job.key, error = %e, "Follow-up delivery failed");
                    if let Err(store_err) = self.store.mark_failed(&job.key, &e.to_string()).await {
                        warn!(key = %job.key, error = %store_err, "Failed follow-up could not be marked");
                    }
                    (AuditOutcome::Failure, Some(e.to_string()))
                }
            };

            if let Some(audit) = &self.audit {
                audit.log(
                    AuditEvent::FollowUpDelivered { key: job.key.clone() },
                    &job.user_id,
                    outcome.0,
                    outcome.1,
                );
            }
        }
        Ok(delivered)
    }

    /// Run [`run_once`](Self::run_once) on a fixed interval until the task is aborted.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.poll_interval);
            info!(
                store = self.store.name(),
                sink = self.sink.name(),
                interval_secs = self.poll_interval.as_secs(),
                "Follow-up worker started"
            );

            loop {
                interval.tick().await;
                if let Err(e) = self.run_once().await {
                    warn!(error = %e, "Follow-up poll failed");
                }
            }
        })
    }
}
