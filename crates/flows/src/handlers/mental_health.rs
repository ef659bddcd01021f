//! Mental-health companion: supportive conversation with crisis escalation.

use super::{
    ClinicRef, FlowHandler, FollowUpPlan, TypedFlow, clinic_properties, follow_up_intent, follow_up_properties,
    merge_directory, output_text,
};
use crate::composer::{ComposerProfile, Section};
use crate::dispatcher::ToolLedger;
use healthflow_core::contract::OutputContract;
use healthflow_core::flow::{FlowKind, FlowRequest};
use healthflow_core::severity::Severity;
use healthflow_effects::{AlertKind, EmergencyAlert, SideEffectIntent, referenced_metrics};
use healthflow_policy::{Policy, PolicyRule, PolicySet};
use healthflow_tools::SEARCH_DIRECTORY;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Resource inserted when a crisis is detected and the answer lists none.
pub const CRISIS_RESOURCE: &str = "If you are thinking about harming yourself, call or text 988 \
     (Suicide & Crisis Lifeline, US) or your local emergency number right now.";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MentalHealthOutput {
    pub response: String,
    pub crisis_detected: bool,
    pub crisis_resources: Vec<String>,
    pub coping_strategies: Vec<String>,
    pub matched_professionals: Vec<ClinicRef>,
    pub follow_up: Option<FollowUpPlan>,
    pub disclaimer: String,
}

pub struct MentalHealthCompanion;

impl TypedFlow for MentalHealthCompanion {
    const KIND: FlowKind = FlowKind::MentalHealth;
    type Output = MentalHealthOutput;
}

impl FlowHandler for MentalHealthCompanion {
    fn kind(&self) -> FlowKind {
        FlowKind::MentalHealth
    }

    fn contract(&self) -> OutputContract {
        OutputContract::new("mental_health", "response")
            .text("response", "A warm, non-judgemental reply")
            .flag("crisisDetected", "True when the user may be at risk of harming themselves")
            .list("crisisResources", 3, "Crisis lines or services to contact now")
            .list("copingStrategies", 3, "Small things to try today")
            .object_list("matchedProfessionals", 3, clinic_properties(), "Professionals who could help")
            .object("followUp", follow_up_properties(), "A check-in to schedule, if useful")
            .text("disclaimer", "Safety disclaimer")
    }

    fn profile(&self) -> ComposerProfile {
        ComposerProfile::new(
            "You are a compassionate mental-health companion. You listen, reflect, and suggest \
             gentle coping strategies. You are not a therapist.",
            &[
                Section::UserQuery,
                Section::Demographics,
                Section::CurrentMedications,
                Section::MoodPattern,
                Section::Trends,
                Section::EscalationMetrics,
                Section::LocalDirectoryMatches,
            ],
        )
        .with_guidance("If the user mentions self-harm or suicide, set crisisDetected and list crisis resources first.")
        .with_guidance("Do not quote escalation metrics back to the user unless they ask about them.")
    }

    fn policies(&self) -> PolicySet {
        PolicySet::new().with(
            Policy::new(
                PolicyRule::EmergencyEscalation {
                    flag: "crisisDetected".into(),
                    advice_field: "crisisResources".into(),
                    advice: Some(CRISIS_RESOURCE.into()),
                },
                5,
            )
            .named("mental-health-crisis"),
        )
    }

    fn tools(&self, _request: &FlowRequest, _severity: Severity) -> Vec<&'static str> {
        vec![SEARCH_DIRECTORY]
    }

    fn merge(&self, output: &mut Value, request: &FlowRequest, ledger: &ToolLedger) {
        merge_directory(output, "matchedProfessionals", request, ledger);
    }

    fn intents(&self, output: &Value, request: &FlowRequest) -> Vec<SideEffectIntent> {
        let mut intents = Vec::new();

        if output.get("crisisDetected").and_then(Value::as_bool) == Some(true) {
            let message = output
                .get("crisisResources")
                .and_then(Value::as_array)
                .and_then(|r| r.first())
                .and_then(Value::as_str)
                .unwrap_or(CRISIS_RESOURCE);
            intents.push(SideEffectIntent::EmergencyAlert {
                user_id: request.user_id.clone(),
                alert: EmergencyAlert::new(AlertKind::Crisis, FlowKind::MentalHealth, "Crisis support", message),
            });
        }

        intents.extend(follow_up_intent(output, request, FlowKind::MentalHealth));

        if let Some(metrics) = request.metrics.as_ref().filter(|m| !m.is_empty()) {
            let referenced = referenced_metrics(&output_text(output), metrics);
            if !referenced.is_empty() {
                intents.push(SideEffectIntent::AuditMetricsReference {
                    user_id: request.user_id.clone(),
                    flow: FlowKind::MentalHealth,
                    referenced,
                });
            }
        }

        intents
    }
}
