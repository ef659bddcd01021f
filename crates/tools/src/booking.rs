//! Appointment booking tool: simulated external scheduler.
//!
//! Each booking attempt fails with a configurable probability, in which case
//! the tool reports "slot unavailable" as a structured result rather than an
//! error. Dates and times are natural-language phrases and are passed
//! through untouched.

use async_trait::async_trait;
use healthflow_core::error::ToolError;
use healthflow_core::tool::{Tool, ToolResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use tracing::debug;

pub struct BookAppointmentTool {
    failure_rate: f64,
    rng: Mutex<StdRng>,
}

impl BookAppointmentTool {
    pub fn new(failure_rate: f64) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Reproducible outcomes for tests.
    pub fn with_seed(failure_rate: f64, seed: u64) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn failure_rate(&self) -> f64 {
        self.failure_rate
    }

    /// Roll the scheduler: `Some(confirmation)` on success.
    fn roll(&self) -> Result<Option<u32>, ToolError> {
        let mut rng = self.rng.lock().map_err(|_| ToolError::ExecutionFailed {
            tool_name: crate::BOOK_APPOINTMENT.into(),
            reason: "scheduler state poisoned".into(),
        })?;
        if rng.random_bool(self.failure_rate) {
            Ok(None)
        } else {
            Ok(Some(rng.random_range(100_000..1_000_000)))
        }
    }
}

#[async_trait]
impl Tool for BookAppointmentTool {
    fn name(&self) -> &str {
        crate::BOOK_APPOINTMENT
    }

    fn description(&self) -> &str {
        "Book an appointment at a clinic. Returns a confirmation ID on success, \
         or reports that the requested slot is unavailable."
    }

    fn usage_guidance(&self) -> &str {
        "Call only when the user explicitly asks to book; pass the date and time exactly as the user said them."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "clinicName": {
                    "type": "string",
                    "description": "Name of the clinic to book at"
                },
                "clinicId": {
                    "type": "string",
                    "description": "Directory id of the clinic, if known"
                },
                "date": {
                    "type": "string",
                    "description": "Requested date as the user phrased it (e.g. 'next Tuesday')"
                },
                "time": {
                    "type": "string",
                    "description": "Requested time as the user phrased it (e.g. 'after 3pm')"
                },
                "reason": {
                    "type": "string",
                    "description": "Short reason for the visit"
                }
            },
            "required": ["clinicName", "date"]
        })
    }

    fn output_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "status": { "type": "string", "enum": ["confirmed", "unavailable"] },
                "confirmationId": { "type": "string" },
                "clinicName": { "type": "string" },
                "date": { "type": "string" },
                "time": { "type": "string" }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let clinic = arguments["clinicName"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'clinicName' argument".into()))?;
        let date = arguments["date"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'date' argument".into()))?;
        let time = arguments["time"].as_str().unwrap_or("");

        match self.roll()? {
            Some(number) => {
                let confirmation_id = format!("APT-{number}");
                debug!(clinic, date, time, %confirmation_id, "Appointment booked");
                Ok(ToolResult::ok(
                    String::new(),
                    format!("Booked {clinic} for {date} {time}. Confirmation {confirmation_id}.").replace("  ", " "),
                    serde_json::json!({
                        "status": "confirmed",
                        "confirmationId": confirmation_id,
                        "clinicName": clinic,
                        "date": date,
                        "time": time,
                    }),
                ))
            }
            None => {
                debug!(clinic, date, time, "Requested slot unavailable");
                Ok(ToolResult {
                    call_id: String::new(),
                    success: false,
                    output: format!(
                        "The requested slot at {clinic} is unavailable. Ask the user for another date or time."
                    ),
                    data: Some(serde_json::json!({
                        "status": "unavailable",
                        "clinicName": clinic,
                        "date": date,
                        "time": time,
                    })),
                })
            }
        }
    }
}
