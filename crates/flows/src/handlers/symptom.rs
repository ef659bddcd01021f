//! Symptom assistant: triage-style guidance with emergency escalation.

use super::{
    ClinicRef, FlowHandler, ResourceLink, TypedFlow, clinic_properties, merge_directory, resource_link_properties, str_field,
};
use crate::composer::{ComposerProfile, Section};
use crate::dispatcher::ToolLedger;
use healthflow_core::contract::OutputContract;
use healthflow_core::flow::{FlowKind, FlowRequest};
use healthflow_core::severity::Severity;
use healthflow_effects::{AlertKind, EmergencyAlert, SideEffectIntent};
use healthflow_policy::{Policy, PolicyRule, PolicySet};
use healthflow_tools::FIND_NEARBY_CLINICS;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SymptomOutput {
    pub response: String,
    pub emergency_detected: bool,
    pub emergency_advice: Option<String>,
    pub possible_causes: Vec<String>,
    pub quick_suggestions: Vec<String>,
    pub resource_links: Vec<ResourceLink>,
    pub suggested_facilities: Vec<ClinicRef>,
    pub disclaimer: String,
}

pub struct SymptomAssistant;

impl TypedFlow for SymptomAssistant {
    const KIND: FlowKind = FlowKind::Symptom;
    type Output = SymptomOutput;
}

impl FlowHandler for SymptomAssistant {
    fn kind(&self) -> FlowKind {
        FlowKind::Symptom
    }

    fn contract(&self) -> OutputContract {
        OutputContract::new("symptom", "response")
            .text("response", "Plain-language guidance about the described symptoms")
            .flag("emergencyDetected", "True when the symptoms may be a medical emergency")
            .optional_text("emergencyAdvice", "What to do right now if this is an emergency")
            .list("possibleCauses", 5, "Common, non-diagnostic explanations")
            .list("quickSuggestions", 3, "Short self-care steps")
            .object_list("resourceLinks", 3, resource_link_properties(), "Reputable public health links")
            .object_list(
                "suggestedFacilities",
                3,
                clinic_properties(),
                "Nearby places to get care, when in-person care is advisable",
            )
            .text("disclaimer", "Safety disclaimer")
    }

    fn profile(&self) -> ComposerProfile {
        ComposerProfile::new(
            "You are a careful symptom assistant. You explain what symptoms might mean \
             and when to seek care. You never diagnose.",
            &[
                Section::UserQuery,
                Section::Demographics,
                Section::KnownConditions,
                Section::CurrentMedications,
                Section::Allergies,
                Section::Lifestyle,
                Section::RiskFlags,
                Section::Trends,
            ],
        )
        .with_guidance(
            "If the symptoms could be life-threatening, set emergencyDetected and tell the user \
             to call emergency services now.",
        )
        .with_guidance("List possible causes as possibilities, not conclusions.")
    }

    fn policies(&self) -> PolicySet {
        PolicySet::new().with(
            Policy::new(
                PolicyRule::EmergencyEscalation {
                    flag: "emergencyDetected".into(),
                    advice_field: "emergencyAdvice".into(),
                    advice: None,
                },
                5,
            )
            .named("symptom-emergency"),
        )
    }

    fn tools(&self, _request: &FlowRequest, severity: Severity) -> Vec<&'static str> {
        if severity >= Severity::Elevated {
            vec![FIND_NEARBY_CLINICS]
        } else {
            Vec::new()
        }
    }

    fn merge(&self, output: &mut Value, request: &FlowRequest, ledger: &ToolLedger) {
        merge_directory(output, "suggestedFacilities", request, ledger);
    }

    fn intents(&self, output: &Value, request: &FlowRequest) -> Vec<SideEffectIntent> {
        if output.get("emergencyDetected").and_then(Value::as_bool) != Some(true) {
            return Vec::new();
        }
        let advice = match str_field(output, "emergencyAdvice") {
            "" => str_field(output, "response"),
            advice => advice,
        };
        vec![SideEffectIntent::EmergencyAlert {
            user_id: request.user_id.clone(),
            alert: EmergencyAlert::new(
                AlertKind::Emergency,
                FlowKind::Symptom,
                "Possible medical emergency",
                advice,
            ),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nearby_clinics_only_when_elevated() {
        let request = FlowRequest::new("mild headache");
        assert!(SymptomAssistant.tools(&request, Severity::Low).is_empty());
        assert_eq!(SymptomAssistant.tools(&request, Severity::Elevated), vec![FIND_NEARBY_CLINICS]);
        assert_eq!(SymptomAssistant.tools(&request, Severity::Urgent), vec![FIND_NEARBY_CLINICS]);
    }

    #[test]
    fn emergency_raises_alert() {
        let output = json!({
            "response": "Call emergency services.",
            "emergencyDetected": true,
            "emergencyAdvice": "Call 911 now."
        });
        let intents = SymptomAssistant.intents(&output, &FlowRequest::new("x"));
        assert_eq!(intents.len(), 1);
        match &intents[0] {
            SideEffectIntent::EmergencyAlert { user_id, alert } => {
                assert!(user_id.is_none());
                assert_eq!(alert.message, "Call 911 now.");
                assert!(!alert.dismissible);
            }
            other => panic!("unexpected intent: {other:?}"),
        }
    }

    #[test]
    fn no_alert_without_emergency() {
        let output = json!({"response": "Rest.", "emergencyDetected": false});
        assert!(SymptomAssistant.intents(&output, &FlowRequest::new("x")).is_empty());
    }

    #[test]
    fn policies_fit_the_contract() {
        let contract = SymptomAssistant.contract();
        SymptomAssistant.policies().validate_against(&contract).unwrap();
        let output: SymptomOutput = serde_json::from_value(contract.skeleton()).unwrap();
        assert!(!output.emergency_detected);
    }
}
