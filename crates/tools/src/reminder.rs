//! Reminder tool and the in-process reminder book it writes to.

use async_trait::async_trait;
use healthflow_core::error::ToolError;
use healthflow_core::tool::{Tool, ToolResult};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// A reminder as the user phrased it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub id: String,
    pub title: String,
    /// The time phrase, verbatim ("every morning at 8", "tomorrow after lunch")
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Reminders created during this process's lifetime.
#[derive(Debug, Default)]
pub struct ReminderBook {
    reminders: Mutex<Vec<Reminder>>,
}

impl ReminderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, title: &str, time: &str, notes: Option<String>) -> Reminder {
        let reminder = Reminder {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            time: time.to_string(),
            notes,
        };
        if let Ok(mut list) = self.reminders.lock() {
            list.push(reminder.clone());
        }
        reminder
    }

    pub fn list(&self) -> Vec<Reminder> {
        self.reminders.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

pub struct SetReminderTool {
    book: Arc<ReminderBook>,
}

impl SetReminderTool {
    pub fn new(book: Arc<ReminderBook>) -> Self {
        Self { book }
    }
}

#[async_trait]
impl Tool for SetReminderTool {
    fn name(&self) -> &str {
        crate::SET_REMINDER
    }

    fn description(&self) -> &str {
        "Create a reminder for the user (medication, exercise, water intake, check-ins)."
    }

    fn usage_guidance(&self) -> &str {
        "Call when the user asks to be reminded; pass the time exactly as the user said it."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "title": {
                    "type": "string",
                    "description": "What to remind the user about"
                },
                "time": {
                    "type": "string",
                    "description": "When, as the user phrased it (e.g. 'every day at 8am')"
                },
                "notes": {
                    "type": "string",
                    "description": "Optional extra detail"
                }
            },
            "required": ["title", "time"]
        })
    }

    fn output_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "title": { "type": "string" },
                "time": { "type": "string" }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let title = arguments["title"]
            .as_str()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'title' argument".into()))?;
        let time = arguments["time"]
            .as_str()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'time' argument".into()))?;
        let notes = arguments["notes"].as_str().map(String::from);

        let reminder = self.book.add(title, time, notes);
        let data = serde_json::to_value(&reminder)
            .map_err(|e| ToolError::ExecutionFailed { tool_name: crate::SET_REMINDER.into(), reason: e.to_string() })?;

        Ok(ToolResult::ok(
            String::new(),
            format!("Reminder set: {title} ({time})"),
            data,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reminder_is_recorded_verbatim() {
        let book = Arc::new(ReminderBook::new());
        let tool = SetReminderTool::new(book.clone());
        let result = tool
            .execute(serde_json::json!({"title": "Take metformin", "time": "every evening with dinner"}))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.data.unwrap()["time"], "every evening with dinner");
        let list = book.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].title, "Take metformin");
    }

    #[tokio::test]
    async fn blank_time_is_invalid() {
        let tool = SetReminderTool::new(Arc::new(ReminderBook::new()));
        let err = tool
            .execute(serde_json::json!({"title": "Walk", "time": "  "}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
