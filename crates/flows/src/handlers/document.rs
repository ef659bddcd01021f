//! Document interpreter: explains lab reports, prescriptions and similar
//! paperwork in plain language. Accepts text, an image, or both.

use super::{FlowHandler, ResourceLink, TypedFlow, resource_link_properties};
use crate::composer::{ComposerProfile, Section};
use healthflow_core::contract::OutputContract;
use healthflow_core::flow::{FlowKind, FlowRequest};
use healthflow_core::severity::Severity;
use healthflow_policy::{Policy, PolicyRule, PolicySet};
use healthflow_tools::FETCH_PAGE;
use serde::{Deserialize, Serialize};

/// Phrase added to result explanations that do not already send the user
/// to their doctor.
pub const CONSULT_PHRASE: &str = "Please discuss these results with your doctor.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentType {
    #[serde(rename = "Lab Report")]
    LabReport,
    #[serde(rename = "Radiology Report")]
    RadiologyReport,
    Prescription,
    #[serde(rename = "Discharge Summary")]
    DischargeSummary,
    #[serde(rename = "Insurance Document")]
    InsuranceDocument,
    #[default]
    Other,
}

impl DocumentType {
    pub const LABELS: [&'static str; 6] = [
        "Lab Report",
        "Radiology Report",
        "Prescription",
        "Discharge Summary",
        "Insurance Document",
        "Other",
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentOutput {
    pub document_type: DocumentType,
    pub summary: String,
    pub plain_language_explanation: String,
    pub key_findings: Vec<String>,
    pub next_step_suggestion: String,
    pub resource_links: Vec<ResourceLink>,
    pub disclaimer: String,
}

pub struct DocumentInterpreter;

impl TypedFlow for DocumentInterpreter {
    const KIND: FlowKind = FlowKind::Document;
    type Output = DocumentOutput;
}

impl FlowHandler for DocumentInterpreter {
    fn kind(&self) -> FlowKind {
        FlowKind::Document
    }

    fn contract(&self) -> OutputContract {
        OutputContract::new("document", "summary")
            .enumeration("documentType", &DocumentType::LABELS, "What kind of document this is")
            .text("summary", "One or two sentences on what the document says")
            .text("plainLanguageExplanation", "The document explained without jargon")
            .list("keyFindings", 8, "Notable values or statements, each with its meaning")
            .text("nextStepSuggestion", "A sensible next step for the user")
            .object_list("resourceLinks", 3, resource_link_properties(), "Reputable pages explaining the tests or terms")
            .text("disclaimer", "Safety disclaimer")
    }

    fn profile(&self) -> ComposerProfile {
        ComposerProfile::new(
            "You are a medical document interpreter. You explain health documents in plain \
             language without diagnosing or changing treatment.",
            &[
                Section::UserQuery,
                Section::Demographics,
                Section::KnownConditions,
                Section::CurrentMedications,
            ],
        )
        .with_guidance("If an attachment is provided, read it as the document to interpret.")
        .with_guidance("Flag values outside the reference range, but do not say what they prove.")
    }

    fn policies(&self) -> PolicySet {
        PolicySet::new()
            .with(
                Policy::new(
                    PolicyRule::RequiredText {
                        field: "plainLanguageExplanation".into(),
                        fallback: "A plain-language explanation is not available for this document.".into(),
                    },
                    45,
                )
                .named("document-explanation"),
            )
            .with(
                Policy::new(
                    PolicyRule::EnsurePhrase {
                        when_field: "documentType".into(),
                        when_values: vec!["Lab Report".into(), "Radiology Report".into()],
                        targets: vec!["plainLanguageExplanation".into(), "nextStepSuggestion".into()],
                        phrase: CONSULT_PHRASE.into(),
                        accept: vec![
                            "talk to your doctor".into(),
                            "talk with your doctor".into(),
                            "consult your doctor".into(),
                            "speak with your doctor".into(),
                            "ask your doctor".into(),
                            "with your healthcare provider".into(),
                        ],
                    },
                    60,
                )
                .named("document-consult-doctor"),
            )
    }

    fn tools(&self, _request: &FlowRequest, _severity: Severity) -> Vec<&'static str> {
        vec![FETCH_PAGE]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healthflow_policy::{PolicyInput, enforce};
    use serde_json::json;

    #[test]
    fn lab_report_gets_consult_phrase() {
        let output = json!({
            "documentType": "Lab Report",
            "summary": "Complete blood count.",
            "plainLanguageExplanation": "Your hemoglobin is slightly low.",
            "keyFindings": [],
            "nextStepSuggestion": "Eat iron-rich foods",
            "resourceLinks": [],
            "disclaimer": ""
        });
        let (output, report) = enforce(output, &DocumentInterpreter.policies(), &PolicyInput::new(FlowKind::Document));
        assert!(report.touched("plainLanguageExplanation"));
        assert!(output["plainLanguageExplanation"].as_str().unwrap().ends_with(CONSULT_PHRASE));
    }

    #[test]
    fn existing_doctor_mention_is_kept() {
        let output = json!({
            "documentType": "Radiology Report",
            "plainLanguageExplanation": "The X-ray shows no fracture.",
            "nextStepSuggestion": "Ask your doctor whether you need a follow-up scan."
        });
        let (_, report) = enforce(output, &DocumentInterpreter.policies(), &PolicyInput::new(FlowKind::Document));
        assert!(report.is_clean());
    }

    #[test]
    fn prescriptions_are_left_alone() {
        let output = json!({
            "documentType": "Prescription",
            "plainLanguageExplanation": "Take one tablet daily.",
            "nextStepSuggestion": "Set a reminder."
        });
        let (_, report) = enforce(output, &DocumentInterpreter.policies(), &PolicyInput::new(FlowKind::Document));
        assert!(report.is_clean());
    }

    #[test]
    fn labels_match_serde_names() {
        for label in DocumentType::LABELS {
            let parsed: DocumentType = serde_json::from_value(json!(label)).unwrap();
            assert_eq!(serde_json::to_value(parsed).unwrap(), json!(label));
        }
        DocumentInterpreter.policies().validate_against(&DocumentInterpreter.contract()).unwrap();
    }
}
