//! Tool dispatcher: runs the tool calls a backend asked for.
//!
//! Calls run one at a time, in the order requested. Nothing here fails the
//! invocation: unknown tools, bad arguments, tool errors and timeouts all
//! become a `success=false` [`ToolResult`] the model can read.

use chrono::Utc;
use healthflow_core::error::{FlowError, ToolError};
use healthflow_core::event::{DomainEvent, EventBus};
use healthflow_core::flow::DirectoryEntry;
use healthflow_core::message::MessageToolCall;
use healthflow_core::tool::{ToolCall, ToolRegistry, ToolResult};
use healthflow_tools::{BOOK_APPOINTMENT, FIND_NEARBY_CLINICS, SEARCH_DIRECTORY, SET_REMINDER};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default per-call limit.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub call: ToolCall,
    pub result: ToolResult,
    pub duration_ms: u64,
}

/// Everything the tools did during one invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolLedger {
    outcomes: Vec<ToolOutcome>,
}

impl ToolLedger {
    pub fn record(&mut self, outcome: ToolOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn outcomes(&self) -> &[ToolOutcome] {
        &self.outcomes
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn called(&self, tool: &str) -> bool {
        self.outcomes.iter().any(|o| o.call.name == tool)
    }

    fn successful(&self, tool: &str) -> impl Iterator<Item = &Value> + '_ {
        let tool = tool.to_string();
        self.outcomes
            .iter()
            .filter(move |o| o.call.name == tool && o.result.success)
            .filter_map(|o| o.result.data.as_ref())
    }

    /// Directory entries returned by `search_directory` or
    /// `find_nearby_clinics`, deduplicated by id, in call order.
    pub fn directory_entries(&self) -> Vec<DirectoryEntry> {
        let mut entries: Vec<DirectoryEntry> = Vec::new();
        for outcome in self.outcomes.iter().filter(|o| o.result.success) {
            let key = match outcome.call.name.as_str() {
                SEARCH_DIRECTORY => "matches",
                FIND_NEARBY_CLINICS => "clinics",
                _ => continue,
            };
            let Some(list) = outcome.result.data.as_ref().and_then(|d| d.get(key)) else {
                continue;
            };
            let found: Vec<DirectoryEntry> = serde_json::from_value(list.clone()).unwrap_or_default();
            for entry in found {
                if !entries.iter().any(|e| e.id == entry.id) {
                    entries.push(entry);
                }
            }
        }
        entries
    }

    /// Data of the last confirmed booking, if any.
    pub fn booking_confirmation(&self) -> Option<Value> {
        self.successful(BOOK_APPOINTMENT)
            .filter(|d| d.get("status").and_then(Value::as_str) == Some("confirmed"))
            .last()
            .cloned()
    }

    /// Data of the last reminder created, if any.
    pub fn reminder(&self) -> Option<Value> {
        self.successful(SET_REMINDER).last().cloned()
    }
}

/// Executes tool calls against one flow's registry.
pub struct ToolDispatcher {
    timeout: Duration,
    event_bus: Option<Arc<EventBus>>,
}

impl Default for ToolDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL_TIMEOUT)
    }
}

impl ToolDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, event_bus: None }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Run every call in order, recording each outcome in `ledger`.
    pub async fn dispatch_all(
        &self,
        registry: &ToolRegistry,
        calls: &[MessageToolCall],
        ledger: &mut ToolLedger,
    ) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let outcome = self.dispatch(registry, call).await;
            results.push(outcome.result.clone());
            ledger.record(outcome);
        }
        results
    }

    /// Run one call. Never fails.
    pub async fn dispatch(&self, registry: &ToolRegistry, tc: &MessageToolCall) -> ToolOutcome {
        let start = Instant::now();
        let (call, result) = match parse_arguments(&tc.arguments) {
            Ok(arguments) => {
                let call = ToolCall {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    arguments,
                };
                let result = self.execute(registry, &call).await;
                (call, result)
            }
            Err(reason) => {
                let call = ToolCall {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    arguments: Value::Null,
                };
                (call, self.failure(&tc.id, &tc.name, ToolError::InvalidArguments(reason)))
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(tool = %call.name, success = result.success, duration_ms, "Tool dispatched");
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ToolExecuted {
                tool_name: call.name.clone(),
                success: result.success,
                duration_ms,
                timestamp: Utc::now(),
            });
        }

        ToolOutcome { call, result, duration_ms }
    }

    async fn execute(&self, registry: &ToolRegistry, call: &ToolCall) -> ToolResult {
        match tokio::time::timeout(self.timeout, registry.execute(call)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => self.failure(&call.id, &call.name, e),
            Err(_) => self.failure(
                &call.id,
                &call.name,
                ToolError::Timeout {
                    tool_name: call.name.clone(),
                    timeout_secs: self.timeout.as_secs(),
                },
            ),
        }
    }

    fn failure(&self, call_id: &str, tool_name: &str, error: ToolError) -> ToolResult {
        let message = match &error {
            ToolError::NotFound(name) => format!("Tool '{name}' is not available for this request."),
            ToolError::InvalidArguments(reason) => format!("The arguments were invalid: {reason}"),
            ToolError::Timeout { .. } => "The tool did not respond in time.".to_string(),
            ToolError::ExecutionFailed { reason, .. } => format!("The tool failed: {reason}"),
        };
        let failure = FlowError::ToolFailure {
            tool_name: tool_name.to_string(),
            reason: error.to_string(),
        };
        warn!(tool = %tool_name, "{failure}");
        ToolResult::failed(call_id, message)
    }
}

fn parse_arguments(raw: &str) -> Result<Value, String> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(format!("expected a JSON object, got {other}")),
        Err(e) => Err(format!("not valid JSON: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use healthflow_core::tool::Tool;
    use healthflow_tools::ToolKit;

    fn call(id: &str, name: &str, args: Value) -> MessageToolCall {
        MessageToolCall {
            id: id.into(),
            name: name.into(),
            arguments: args.to_string(),
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Never finishes in time"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _arguments: Value) -> Result<ToolResult, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ToolResult::ok("", "done", Value::Null))
        }
    }

    #[tokio::test]
    async fn unknown_tool_becomes_failed_result() {
        let registry = ToolKit::with_failure_rate(0.0).registry(&[SEARCH_DIRECTORY]);
        let outcome = ToolDispatcher::default()
            .dispatch(&registry, &call("c0", "book_flight", serde_json::json!({})))
            .await;
        assert!(!outcome.result.success);
        assert_eq!(outcome.result.call_id, "c0");
        assert!(outcome.result.output.contains("not available"));
    }

    #[tokio::test]
    async fn malformed_arguments_become_failed_result() {
        let registry = ToolKit::with_failure_rate(0.0).registry(&[SEARCH_DIRECTORY]);
        let tc = MessageToolCall {
            id: "c1".into(),
            name: SEARCH_DIRECTORY.into(),
            arguments: "{not json".into(),
        };
        let outcome = ToolDispatcher::default().dispatch(&registry, &tc).await;
        assert!(!outcome.result.success);
        assert!(outcome.result.output.contains("invalid"));
    }

    #[tokio::test]
    async fn tool_errors_become_failed_results() {
        let registry = ToolKit::with_failure_rate(0.0).registry(&[BOOK_APPOINTMENT]);
        let outcome = ToolDispatcher::default()
            .dispatch(&registry, &call("c2", BOOK_APPOINTMENT, serde_json::json!({"clinicName": "X"})))
            .await;
        assert!(!outcome.result.success);
        assert!(outcome.result.output.contains("date"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tools_time_out() {
        let registry = ToolRegistry::new().with(Arc::new(SlowTool));
        let dispatcher = ToolDispatcher::new(Duration::from_secs(2));
        let outcome = dispatcher.dispatch(&registry, &call("c3", "slow", serde_json::json!({}))).await;
        assert!(!outcome.result.success);
        assert!(outcome.result.output.contains("in time"));
    }

    #[tokio::test]
    async fn calls_run_in_order_and_fill_the_ledger() {
        let kit = ToolKit::seeded(healthflow_tools::ClinicDirectory::sample(), 0.0, 1);
        let registry = kit.registry(&[SEARCH_DIRECTORY, BOOK_APPOINTMENT]);
        let mut ledger = ToolLedger::default();
        let results = ToolDispatcher::default()
            .dispatch_all(
                &registry,
                &[
                    call("a", SEARCH_DIRECTORY, serde_json::json!({"query": "urgent care"})),
                    call(
                        "b",
                        BOOK_APPOINTMENT,
                        serde_json::json!({"clinicName": "Eastside Urgent Care", "date": "next Tuesday"}),
                    ),
                ],
                &mut ledger,
            )
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].call_id, "a");
        assert_eq!(results[1].call_id, "b");
        assert!(!ledger.directory_entries().is_empty());
        let booking = ledger.booking_confirmation().unwrap();
        assert_eq!(booking["date"], "next Tuesday");
    }

    #[tokio::test]
    async fn failed_booking_leaves_no_confirmation() {
        let kit = ToolKit::seeded(healthflow_tools::ClinicDirectory::sample(), 1.0, 1);
        let registry = kit.registry(&[BOOK_APPOINTMENT]);
        let mut ledger = ToolLedger::default();
        ToolDispatcher::default()
            .dispatch_all(
                &registry,
                &[call("a", BOOK_APPOINTMENT, serde_json::json!({"clinicName": "Eastside", "date": "Friday"}))],
                &mut ledger,
            )
            .await;
        assert!(ledger.called(BOOK_APPOINTMENT));
        assert!(ledger.booking_confirmation().is_none());
    }

    #[tokio::test]
    async fn dispatch_publishes_tool_events() {
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();
        let registry = ToolKit::with_failure_rate(0.0).registry(&[SEARCH_DIRECTORY]);
        ToolDispatcher::default()
            .with_event_bus(bus)
            .dispatch(&registry, &call("a", SEARCH_DIRECTORY, serde_json::json!({"query": "dermatology"})))
            .await;

        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::ToolExecuted { tool_name, success, .. } => {
                assert_eq!(tool_name, SEARCH_DIRECTORY);
                assert!(success);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn ledger_deduplicates_directory_entries() {
        let entry = serde_json::json!({"id": "d1", "name": "Clinic"});
        let mut ledger = ToolLedger::default();
        for (i, name, key) in [(0, SEARCH_DIRECTORY, "matches"), (1, FIND_NEARBY_CLINICS, "clinics")] {
            ledger.record(ToolOutcome {
                call: ToolCall {
                    id: format!("c{i}"),
                    name: name.into(),
                    arguments: Value::Null,
                },
                result: ToolResult::ok(format!("c{i}"), "", serde_json::json!({ key: [entry.clone()] })),
                duration_ms: 0,
            });
        }
        assert_eq!(ledger.directory_entries().len(), 1);
    }
}
