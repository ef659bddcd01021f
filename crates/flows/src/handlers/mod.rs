//! The five built-in flows.
//!
//! A [`FlowHandler`] supplies everything flow-specific: the output contract,
//! what the composer should include, which tools to declare, extra policies,
//! how tool data is merged back, and which side effects the final answer
//! implies. The [`FlowRunner`](crate::FlowRunner) owns the pipeline.

pub mod care;
pub mod document;
pub mod lifestyle;
pub mod mental_health;
pub mod symptom;

pub use care::{CareNavigator, CareOutput};
pub use document::{DocumentInterpreter, DocumentOutput, DocumentType};
pub use lifestyle::{LifestyleCoach, LifestyleOutput};
pub use mental_health::{MentalHealthCompanion, MentalHealthOutput};
pub use symptom::{SymptomAssistant, SymptomOutput};

use crate::composer::ComposerProfile;
use crate::dispatcher::ToolLedger;
use healthflow_core::contract::{OutputContract, Property};
use healthflow_core::flow::{DirectoryEntry, FlowKind, FlowRequest};
use healthflow_core::severity::Severity;
use healthflow_effects::{FollowUpRequest, SideEffectIntent};
use healthflow_policy::PolicySet;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub trait FlowHandler: Send + Sync {
    fn kind(&self) -> FlowKind;

    fn contract(&self) -> OutputContract;

    fn profile(&self) -> ComposerProfile;

    /// Flow-specific policies, added on top of the contract baseline.
    fn policies(&self) -> PolicySet {
        PolicySet::new()
    }

    /// Tools to declare for this request. Only the primary backend sees them.
    fn tools(&self, request: &FlowRequest, severity: Severity) -> Vec<&'static str>;

    /// Fold tool results into a successful answer.
    fn merge(&self, _output: &mut Value, _request: &FlowRequest, _ledger: &ToolLedger) {}

    /// Side effects implied by the final, policy-enforced answer.
    fn intents(&self, _output: &Value, _request: &FlowRequest) -> Vec<SideEffectIntent> {
        Vec::new()
    }
}

/// Binds a flow kind to its typed output.
pub trait TypedFlow {
    const KIND: FlowKind;
    type Output: DeserializeOwned + Serialize + Send;
}

pub fn builtin() -> Vec<Box<dyn FlowHandler>> {
    vec![
        Box::new(SymptomAssistant),
        Box::new(LifestyleCoach),
        Box::new(CareNavigator),
        Box::new(DocumentInterpreter),
        Box::new(MentalHealthCompanion),
    ]
}

/// A clinic or professional as it appears in flow output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClinicRef {
    pub id: Option<String>,
    pub name: String,
    pub address: Option<String>,
    pub walk_in: Option<bool>,
    pub distance_km: Option<f32>,
    pub phone: Option<String>,
}

/// A reputable public page the answer points to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLink {
    pub title: String,
    pub url: String,
}

/// A check-in the flow asks to schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FollowUpPlan {
    pub delay_hours: f64,
    pub check_in_message: String,
}

pub(crate) fn clinic_properties() -> Vec<Property> {
    vec![
        Property::string("id").optional(),
        Property::string("name"),
        Property::string("address").optional(),
        Property::boolean("walkIn").optional(),
        Property::number("distanceKm").optional(),
        Property::string("phone").optional(),
    ]
}

pub(crate) fn resource_link_properties() -> Vec<Property> {
    vec![Property::string("title"), Property::string("url")]
}

pub(crate) fn follow_up_properties() -> Vec<Property> {
    vec![Property::number("delayHours"), Property::string("checkInMessage")]
}

/// Replace a model-authored clinic list with tool-sourced entries.
///
/// Caller-supplied directory matches win outright. Otherwise entries returned
/// by a directory or nearby-clinics tool in this invocation replace the
/// model's. With neither, the model's list is kept.
pub(crate) fn merge_directory(output: &mut Value, field: &str, request: &FlowRequest, ledger: &ToolLedger) {
    let entries: Vec<DirectoryEntry> = match request.supplied_directory() {
        Some(supplied) => supplied.to_vec(),
        None => ledger.directory_entries(),
    };
    if entries.is_empty() {
        return;
    }
    if let Some(obj) = output.as_object_mut() {
        let list: Vec<Value> = entries.iter().filter_map(|e| serde_json::to_value(e).ok()).collect();
        obj.insert(field.to_string(), Value::Array(list));
    }
}

/// `ScheduleFollowUp` for a non-null `followUp` object with a message.
pub(crate) fn follow_up_intent(output: &Value, request: &FlowRequest, flow: FlowKind) -> Option<SideEffectIntent> {
    let plan: FollowUpPlan = serde_json::from_value(output.get("followUp")?.clone()).ok()?;
    if plan.check_in_message.trim().is_empty() {
        return None;
    }
    Some(SideEffectIntent::ScheduleFollowUp {
        user_id: request.user_id.clone(),
        follow_up: FollowUpRequest {
            flow,
            delay_hours: if plan.delay_hours > 0.0 {
                plan.delay_hours.min(FollowUpRequest::MAX_DELAY_HOURS)
            } else {
                24.0
            },
            check_in_message: plan.check_in_message,
        },
    })
}

/// Every string in the output, joined. Used for reference detection.
pub(crate) fn output_text(output: &Value) -> String {
    fn collect(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::String(s) => out.push(s.clone()),
            Value::Array(items) => items.iter().for_each(|i| collect(i, out)),
            Value::Object(map) => map.values().for_each(|v| collect(v, out)),
            _ => {}
        }
    }
    let mut parts = Vec::new();
    collect(output, &mut parts);
    parts.join("\n")
}

pub(crate) fn str_field<'a>(output: &'a Value, field: &str) -> &'a str {
    output.get(field).and_then(Value::as_str).unwrap_or_default()
}
