//! Lifestyle coach: small, concrete habit plans with reminders and check-ins.

use super::{
    FlowHandler, FollowUpPlan, ResourceLink, TypedFlow, follow_up_intent, follow_up_properties, resource_link_properties,
};
use crate::composer::{ComposerProfile, Section};
use crate::dispatcher::ToolLedger;
use healthflow_core::contract::{OutputContract, Property};
use healthflow_core::flow::{FlowKind, FlowRequest};
use healthflow_core::severity::Severity;
use healthflow_effects::{Notification, NotificationCategory, SideEffectIntent};
use healthflow_tools::SET_REMINDER;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReminderConfirmation {
    pub id: Option<String>,
    pub title: String,
    pub time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LifestyleOutput {
    pub response: String,
    pub action_plan: Vec<String>,
    pub quick_suggestions: Vec<String>,
    pub resource_links: Vec<ResourceLink>,
    pub reminder_confirmation: Option<ReminderConfirmation>,
    pub follow_up: Option<FollowUpPlan>,
    pub disclaimer: String,
}

pub struct LifestyleCoach;

impl TypedFlow for LifestyleCoach {
    const KIND: FlowKind = FlowKind::Lifestyle;
    type Output = LifestyleOutput;
}

impl FlowHandler for LifestyleCoach {
    fn kind(&self) -> FlowKind {
        FlowKind::Lifestyle
    }

    fn contract(&self) -> OutputContract {
        OutputContract::new("lifestyle", "response")
            .text("response", "Encouraging coaching reply")
            .list("actionPlan", 7, "Concrete steps, one per item")
            .list("quickSuggestions", 3, "Short tips")
            .object_list("resourceLinks", 3, resource_link_properties(), "Reputable public health links")
            .object(
                "reminderConfirmation",
                vec![
                    Property::string("id").optional(),
                    Property::string("title"),
                    Property::string("time"),
                ],
                "The reminder that was set, if any",
            )
            .object("followUp", follow_up_properties(), "A check-in to schedule, if useful")
            .text("disclaimer", "Safety disclaimer")
    }

    fn profile(&self) -> ComposerProfile {
        ComposerProfile::new(
            "You are a supportive lifestyle coach. You help people build small, sustainable \
             habits around activity, sleep, nutrition and medication routines.",
            &[
                Section::UserQuery,
                Section::Demographics,
                Section::KnownConditions,
                Section::CurrentMedications,
                Section::Lifestyle,
                Section::Trends,
                Section::MedicationAdherence,
                Section::UpcomingReminders,
            ],
        )
        .with_guidance("Keep the action plan realistic for the next one to two weeks.")
        .with_guidance("Only set a reminder when the user asks for one.")
    }

    fn tools(&self, _request: &FlowRequest, _severity: Severity) -> Vec<&'static str> {
        vec![SET_REMINDER]
    }

    fn merge(&self, output: &mut Value, _request: &FlowRequest, ledger: &ToolLedger) {
        let Some(obj) = output.as_object_mut() else {
            return;
        };
        // Only a reminder that was actually stored may be confirmed.
        let confirmation = match ledger.reminder() {
            Some(reminder) => json!({
                "id": reminder.get("id").cloned().unwrap_or(Value::Null),
                "title": reminder.get("title").cloned().unwrap_or_else(|| json!("")),
                "time": reminder.get("time").cloned().unwrap_or_else(|| json!("")),
            }),
            None => Value::Null,
        };
        obj.insert("reminderConfirmation".into(), confirmation);
    }

    fn intents(&self, output: &Value, request: &FlowRequest) -> Vec<SideEffectIntent> {
        let mut intents = Vec::new();
        if let Some(reminder) = output
            .get("reminderConfirmation")
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value::<ReminderConfirmation>(v.clone()).ok())
        {
            intents.push(SideEffectIntent::Notify {
                user_id: request.user_id.clone(),
                notification: Notification::new(
                    NotificationCategory::Reminder,
                    "Reminder set",
                    format!("{} ({})", reminder.title, reminder.time),
                )
                .with_deep_link("/reminders"),
            });
        }
        intents.extend(follow_up_intent(output, request, FlowKind::Lifestyle));
        intents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::ToolOutcome;
    use healthflow_core::tool::{ToolCall, ToolResult};

    fn reminder_outcome() -> ToolOutcome {
        ToolOutcome {
            call: ToolCall {
                id: "call_0".into(),
                name: SET_REMINDER.into(),
                arguments: json!({"title": "Walk", "time": "7am"}),
            },
            result: ToolResult::ok("call_0", "Reminder set", json!({"id": "r1", "title": "Walk", "time": "7am"})),
            duration_ms: 1,
        }
    }

    #[test]
    fn model_claimed_reminder_is_dropped() {
        let mut output = json!({"reminderConfirmation": {"title": "Walk", "time": "7am"}});
        LifestyleCoach.merge(&mut output, &FlowRequest::new("x"), &ToolLedger::default());
        assert!(output["reminderConfirmation"].is_null());
    }

    #[test]
    fn stored_reminder_is_confirmed_and_notified() {
        let mut ledger = ToolLedger::default();
        ledger.record(reminder_outcome());
        let mut output = json!({"response": "ok", "followUp": null});
        LifestyleCoach.merge(&mut output, &FlowRequest::new("x"), &ledger);
        assert_eq!(output["reminderConfirmation"]["id"], "r1");

        let request = FlowRequest::new("x").with_user("u1");
        let intents = LifestyleCoach.intents(&output, &request);
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].kind(), "notify");
    }

    #[test]
    fn follow_up_is_scheduled() {
        let output = json!({
            "response": "ok",
            "reminderConfirmation": null,
            "followUp": {"delayHours": 72, "checkInMessage": "How is the new routine going?"}
        });
        let intents = LifestyleCoach.intents(&output, &FlowRequest::new("x").with_user("u1"));
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].kind(), "schedule_follow_up");
    }
}
