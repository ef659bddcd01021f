//! Policy enforcement engine.
//!
//! [`enforce`] is a pure function of the output, the policy set and the
//! request context. [`PolicyEngine`] wraps it with a reloadable set and a
//! bounded log of every repair it made.

use crate::locale;
use crate::model::{Policy, PolicyRule, PolicySet};
use crate::text::{contains_ignore_case, has_markdown, strip_markdown};
use chrono::{DateTime, Utc};
use healthflow_core::error::FlowError;
use healthflow_core::flow::FlowKind;
use healthflow_core::severity::Severity;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Request-side facts a rule may depend on.
#[derive(Debug, Clone, Copy)]
pub struct PolicyInput<'a> {
    pub flow: FlowKind,
    pub locale: Option<&'a str>,
    pub severity: Severity,
}

impl<'a> PolicyInput<'a> {
    pub fn new(flow: FlowKind) -> Self {
        Self {
            flow,
            locale: None,
            severity: Severity::Low,
        }
    }

    pub fn with_locale(mut self, locale: Option<&'a str>) -> Self {
        self.locale = locale;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// One repair made to an output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repair {
    pub policy: String,
    pub rule: String,
    pub field: String,
    pub detail: String,
}

impl Repair {
    pub fn to_violation(&self) -> FlowError {
        FlowError::PolicyViolation {
            rule: self.policy.clone(),
            detail: format!("{}: {}", self.field, self.detail),
        }
    }
}

/// Everything [`enforce`] changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyReport {
    pub repairs: Vec<Repair>,
}

impl PolicyReport {
    pub fn is_clean(&self) -> bool {
        self.repairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.repairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repairs.is_empty()
    }

    /// Whether any repair touched `field`.
    pub fn touched(&self, field: &str) -> bool {
        self.repairs.iter().any(|r| r.field == field)
    }

    /// `"<policy>: <field> <detail>"` lines, for responses and logs.
    pub fn summaries(&self) -> Vec<String> {
        self.repairs
            .iter()
            .map(|r| format!("{}: {} {}", r.policy, r.field, r.detail))
            .collect()
    }
}

/// Apply every enabled policy, in priority order, to `output`.
pub fn enforce(output: Value, set: &PolicySet, input: &PolicyInput<'_>) -> (Value, PolicyReport) {
    let mut report = PolicyReport::default();
    let mut obj = match output {
        Value::Object(obj) => obj,
        other => {
            report.repairs.push(Repair {
                policy: "output-shape".into(),
                rule: "object".into(),
                field: "*".into(),
                detail: format!("replaced non-object output ({})", json_type(&other)),
            });
            Map::new()
        }
    };

    for policy in set.ordered() {
        for (field, detail) in apply(policy, &mut obj, input) {
            report.repairs.push(Repair {
                policy: policy.name.clone(),
                rule: policy.rule.kind().to_string(),
                field,
                detail,
            });
        }
    }

    (Value::Object(obj), report)
}

type Repairs = Vec<(String, String)>;

fn apply(policy: &Policy, obj: &mut Map<String, Value>, input: &PolicyInput<'_>) -> Repairs {
    match &policy.rule {
        PolicyRule::Disclaimer { field } => disclaimer(obj, field, input),
        PolicyRule::MaxItems { field, max } => max_items(obj, field, *max),
        PolicyRule::RequiredText { field, fallback } => required_text(obj, field, fallback),
        PolicyRule::EnsurePhrase {
            when_field,
            when_values,
            targets,
            phrase,
            accept,
        } => ensure_phrase(obj, when_field, when_values, targets, phrase, accept),
        PolicyRule::EnsureList { fields } => ensure_list(obj, fields),
        PolicyRule::EmergencyEscalation {
            flag,
            advice_field,
            advice,
        } => emergency(obj, flag, advice_field, advice.as_deref(), input),
        PolicyRule::StripMarkdown { fields } => strip(obj, fields),
    }
}

fn disclaimer(obj: &mut Map<String, Value>, field: &str, input: &PolicyInput<'_>) -> Repairs {
    let canonical = locale::canonical_disclaimer(input.locale);
    let current = obj.get(field).and_then(Value::as_str).unwrap_or_default();
    if current.starts_with(canonical) {
        return Vec::new();
    }
    let trimmed = current.trim_start();
    if trimmed.starts_with(canonical) {
        let trimmed = trimmed.to_string();
        obj.insert(field.to_string(), json!(trimmed));
        return vec![(field.to_string(), "leading whitespace removed".into())];
    }
    obj.insert(field.to_string(), json!(canonical));
    vec![(field.to_string(), "replaced with the canonical disclaimer".into())]
}

fn max_items(obj: &mut Map<String, Value>, field: &str, max: usize) -> Repairs {
    match obj.get_mut(field) {
        Some(Value::Array(items)) if items.len() > max => {
            let dropped = items.len() - max;
            items.truncate(max);
            vec![(field.to_string(), format!("truncated to {max} (dropped {dropped})"))]
        }
        _ => Vec::new(),
    }
}

fn required_text(obj: &mut Map<String, Value>, field: &str, fallback: &str) -> Repairs {
    let present = obj
        .get(field)
        .and_then(Value::as_str)
        .is_some_and(|t| !t.trim().is_empty());
    if present {
        return Vec::new();
    }
    obj.insert(field.to_string(), json!(fallback));
    vec![(field.to_string(), "empty text replaced with fallback".into())]
}

fn ensure_phrase(
    obj: &mut Map<String, Value>,
    when_field: &str,
    when_values: &[String],
    targets: &[String],
    phrase: &str,
    accept: &[String],
) -> Repairs {
    let triggered = obj
        .get(when_field)
        .and_then(Value::as_str)
        .is_some_and(|v| when_values.iter().any(|w| w.trim().eq_ignore_ascii_case(v.trim())));
    if !triggered {
        return Vec::new();
    }

    let satisfied = targets.iter().any(|target| {
        obj.get(target).and_then(Value::as_str).is_some_and(|text| {
            contains_ignore_case(text, phrase) || accept.iter().any(|a| contains_ignore_case(text, a))
        })
    });
    if satisfied {
        return Vec::new();
    }

    let Some(first) = targets.first() else {
        return Vec::new();
    };
    let existing = obj.get(first).and_then(Value::as_str).unwrap_or_default().trim();
    let updated = if existing.is_empty() {
        phrase.to_string()
    } else if existing.ends_with(['.', '!', '?']) {
        format!("{existing} {phrase}")
    } else {
        format!("{existing}. {phrase}")
    };
    obj.insert(first.clone(), json!(updated));
    vec![(first.clone(), "appended required phrase".into())]
}

fn ensure_list(obj: &mut Map<String, Value>, fields: &[String]) -> Repairs {
    let mut repairs = Vec::new();
    for field in fields {
        let replacement = match obj.get(field) {
            Some(Value::Array(_)) => continue,
            Some(Value::String(s)) if !s.trim().is_empty() => json!([s]),
            _ => json!([]),
        };
        obj.insert(field.clone(), replacement);
        repairs.push((field.clone(), "coerced to a list".into()));
    }
    repairs
}

fn emergency(
    obj: &mut Map<String, Value>,
    flag: &str,
    advice_field: &str,
    advice: Option<&str>,
    input: &PolicyInput<'_>,
) -> Repairs {
    let mut repairs = Vec::new();
    if input.severity == Severity::Urgent && obj.get(flag) != Some(&Value::Bool(true)) {
        obj.insert(flag.to_string(), Value::Bool(true));
        repairs.push((flag.to_string(), "forced on for an urgent request".into()));
    }

    let flagged = obj.get(flag).and_then(Value::as_bool).unwrap_or(false);
    if !flagged {
        return repairs;
    }

    let advice = advice.unwrap_or_else(|| locale::emergency_advice(input.locale));
    let has_advice = match obj.get(advice_field) {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => items.iter().any(|i| match i {
            Value::String(s) => !s.trim().is_empty(),
            Value::Null => false,
            _ => true,
        }),
        _ => false,
    };
    if !has_advice {
        let value = match obj.get(advice_field) {
            Some(Value::Array(_)) => json!([advice]),
            _ => json!(advice),
        };
        obj.insert(advice_field.to_string(), value);
        repairs.push((advice_field.to_string(), "filled with emergency advice".into()));
    }
    repairs
}

fn strip(obj: &mut Map<String, Value>, fields: &[String]) -> Repairs {
    let mut repairs = Vec::new();
    for field in fields {
        let changed = match obj.get_mut(field) {
            Some(Value::String(s)) if has_markdown(s.as_str()) => {
                *s = strip_markdown(s);
                true
            }
            Some(Value::Array(items)) => {
                let mut changed = false;
                for item in items.iter_mut() {
                    if let Value::String(s) = item {
                        if has_markdown(s) {
                            *s = strip_markdown(s);
                            changed = true;
                        }
                    }
                }
                changed
            }
            _ => false,
        };
        if changed {
            repairs.push((field.clone(), "markdown removed".into()));
        }
    }
    repairs
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// An entry in the policy repair log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyLogEntry {
    pub flow: FlowKind,
    pub repair: Repair,
    pub timestamp: DateTime<Utc>,
}

/// Maximum policy log entries kept in memory.
const MAX_POLICY_LOG: usize = 5_000;

/// Thread-safe holder of a [`PolicySet`] with a repair log.
pub struct PolicyEngine {
    policies: RwLock<PolicySet>,
    /// Repair log (bounded to MAX_POLICY_LOG entries).
    log: RwLock<Vec<PolicyLogEntry>>,
}

impl PolicyEngine {
    pub fn new(policy_set: PolicySet) -> Result<Self, crate::PolicyError> {
        policy_set.validate()?;
        Ok(Self {
            policies: RwLock::new(policy_set),
            log: RwLock::new(Vec::new()),
        })
    }

    pub fn empty() -> Self {
        Self {
            policies: RwLock::new(PolicySet::new()),
            log: RwLock::new(Vec::new()),
        }
    }

    /// Replace the policy set.
    pub fn reload(&self, policy_set: PolicySet) -> Result<(), crate::PolicyError> {
        policy_set.validate()?;
        *self.policies.write().unwrap_or_else(PoisonError::into_inner) = policy_set;
        info!("Policies reloaded");
        Ok(())
    }

    /// Enforce the current set on `output`, logging each repair.
    pub fn enforce(&self, output: Value, input: &PolicyInput<'_>) -> (Value, PolicyReport) {
        let (value, report) = {
            let set = self.policies.read().unwrap_or_else(PoisonError::into_inner);
            enforce(output, &set, input)
        };

        if report.is_clean() {
            debug!(flow = %input.flow, "Output satisfied every policy");
            return (value, report);
        }

        for repair in &report.repairs {
            let violation = repair.to_violation();
            warn!(
                flow = %input.flow,
                policy = %repair.policy,
                field = %repair.field,
                "Repaired output: {violation}"
            );
        }

        {
            let mut log = self.log.write().unwrap_or_else(PoisonError::into_inner);
            for repair in &report.repairs {
                if log.len() >= MAX_POLICY_LOG {
                    log.drain(..MAX_POLICY_LOG / 10);
                }
                log.push(PolicyLogEntry {
                    flow: input.flow,
                    repair: repair.clone(),
                    timestamp: Utc::now(),
                });
            }
        }

        (value, report)
    }

    pub fn log(&self) -> Vec<PolicyLogEntry> {
        self.log.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn active_count(&self) -> usize {
        self.policies.read().unwrap_or_else(PoisonError::into_inner).active_count()
    }

    pub fn list_policies(&self) -> Vec<Policy> {
        self.policies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .policies
            .clone()
    }

    /// Add a policy at runtime.
    pub fn add_policy(&self, policy: Policy) -> Result<(), crate::PolicyError> {
        policy.validate()?;
        self.policies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add(policy);
        Ok(())
    }

    /// Remove a policy by name at runtime.
    pub fn remove_policy(&self, name: &str) -> bool {
        self.policies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healthflow_core::contract::{OutputContract, Property};

    fn contract() -> OutputContract {
        OutputContract::new("symptom_assessment", "response")
            .text("response", "main answer")
            .flag("emergencyDetected", "emergency flag")
            .optional_text("emergencyAdvice", "what to do now")
            .list("quickSuggestions", 3, "tips")
            .object_list("resourceLinks", 3, vec![Property::string("title"), Property::string("url")], "links")
            .text("disclaimer", "safety text")
    }

    fn symptom_set() -> PolicySet {
        PolicySet::baseline(&contract()).with(Policy::new(
            PolicyRule::EmergencyEscalation {
                flag: "emergencyDetected".into(),
                advice_field: "emergencyAdvice".into(),
                advice: None,
            },
            50,
        ))
    }

    fn input() -> PolicyInput<'static> {
        PolicyInput::new(FlowKind::Symptom)
    }

    #[test]
    fn compliant_output_is_untouched() {
        let output = json!({
            "response": "Rest and drink fluids.",
            "emergencyDetected": false,
            "emergencyAdvice": null,
            "quickSuggestions": ["Rest"],
            "resourceLinks": [],
            "disclaimer": locale::canonical_disclaimer(None),
        });
        let (value, report) = enforce(output.clone(), &symptom_set(), &input());
        assert!(report.is_clean(), "{:?}", report.summaries());
        assert_eq!(value, output);
    }

    #[test]
    fn missing_disclaimer_is_canonical() {
        let (value, report) = enforce(json!({"response": "ok"}), &symptom_set(), &input());
        assert_eq!(value["disclaimer"], locale::canonical_disclaimer(None));
        assert!(report.touched("disclaimer"));
    }

    #[test]
    fn disclaimer_with_canonical_prefix_is_kept() {
        let text = format!("{} Seek care if symptoms worsen.", locale::canonical_disclaimer(Some("en")));
        let (value, report) = enforce(json!({"response": "ok", "disclaimer": text}), &symptom_set(), &input());
        assert_eq!(value["disclaimer"], json!(text));
        assert!(!report.touched("disclaimer"));
    }

    #[test]
    fn disclaimer_with_leading_whitespace_is_trimmed() {
        let canonical = locale::canonical_disclaimer(Some("en"));
        let text = format!("  \n {canonical} Call your GP if unsure.");
        let (value, report) = enforce(json!({"response": "ok", "disclaimer": text}), &symptom_set(), &input());
        assert!(value["disclaimer"].as_str().unwrap().starts_with(canonical));
        assert_eq!(value["disclaimer"], json!(format!("{canonical} Call your GP if unsure.")));
        assert!(report.touched("disclaimer"));
    }

    #[test]
    fn disclaimer_follows_locale() {
        let input = input().with_locale(Some("es-MX"));
        let english = locale::canonical_disclaimer(Some("en"));
        let (value, _) = enforce(json!({"response": "ok", "disclaimer": english}), &symptom_set(), &input);
        assert_eq!(value["disclaimer"], locale::canonical_disclaimer(Some("es")));
    }

    #[test]
    fn unknown_locale_uses_english_disclaimer() {
        let input = input().with_locale(Some("xx"));
        let (value, _) = enforce(json!({"response": "ok", "disclaimer": ""}), &symptom_set(), &input);
        assert_eq!(value["disclaimer"], locale::canonical_disclaimer(Some("en")));
    }

    #[test]
    fn lists_are_capped_never_expanded() {
        let output = json!({
            "response": "ok",
            "quickSuggestions": ["a", "b", "c", "d", "e"],
            "resourceLinks": [{"title": "NHS", "url": "https://www.nhs.uk"}],
        });
        let (value, report) = enforce(output, &symptom_set(), &input());
        assert_eq!(value["quickSuggestions"], json!(["a", "b", "c"]));
        assert_eq!(value["resourceLinks"].as_array().unwrap().len(), 1);
        assert!(report.touched("quickSuggestions"));
        assert!(!report.touched("resourceLinks"));
    }

    #[test]
    fn missing_lists_become_empty() {
        let output = json!({"response": "ok", "quickSuggestions": null});
        let (value, _) = enforce(output, &symptom_set(), &input());
        assert_eq!(value["quickSuggestions"], json!([]));
        assert_eq!(value["resourceLinks"], json!([]));
    }

    #[test]
    fn string_in_list_field_is_wrapped() {
        let output = json!({"response": "ok", "quickSuggestions": "Drink water"});
        let (value, _) = enforce(output, &symptom_set(), &input());
        assert_eq!(value["quickSuggestions"], json!(["Drink water"]));
    }

    #[test]
    fn blank_primary_gets_fallback() {
        let (value, report) = enforce(json!({"response": "  "}), &symptom_set(), &input());
        assert_eq!(value["response"], locale::apology(None));
        assert!(report.touched("response"));
    }

    #[test]
    fn markdown_is_stripped_from_text_and_lists() {
        let output = json!({
            "response": "**Rest** and stay _hydrated_.",
            "quickSuggestions": ["*Sleep* well"],
        });
        let set = PolicySet::new().with(Policy::new(
            PolicyRule::StripMarkdown {
                fields: vec!["response".into(), "quickSuggestions".into()],
            },
            30,
        ));
        let (value, report) = enforce(output, &set, &input());
        assert_eq!(value["response"], "Rest and stay hydrated.");
        assert_eq!(value["quickSuggestions"], json!(["Sleep well"]));
        assert_eq!(report.len(), 2);
    }

    #[test]
    fn urgent_severity_forces_emergency_flag_and_advice() {
        let input = input().with_severity(Severity::Urgent);
        let output = json!({"response": "Please rest.", "emergencyDetected": false});
        let (value, report) = enforce(output, &symptom_set(), &input);
        assert_eq!(value["emergencyDetected"], true);
        assert_eq!(value["emergencyAdvice"], locale::emergency_advice(None));
        assert!(report.touched("emergencyDetected"));
        assert!(report.touched("emergencyAdvice"));
    }

    #[test]
    fn model_flag_keeps_model_advice() {
        let output = json!({
            "response": "This sounds serious.",
            "emergencyDetected": true,
            "emergencyAdvice": "Call 911 now.",
        });
        let (value, report) = enforce(output, &symptom_set(), &input());
        assert_eq!(value["emergencyAdvice"], "Call 911 now.");
        assert!(!report.touched("emergencyAdvice"));
    }

    #[test]
    fn low_severity_leaves_flag_alone() {
        let output = json!({"response": "Mild cold.", "emergencyDetected": false});
        let (value, report) = enforce(output, &symptom_set(), &input());
        assert_eq!(value["emergencyDetected"], false);
        assert!(!report.touched("emergencyAdvice"));
    }

    #[test]
    fn escalation_fills_empty_advice_list() {
        let set = PolicySet::new().with(Policy::new(
            PolicyRule::EmergencyEscalation {
                flag: "crisisDetected".into(),
                advice_field: "crisisResources".into(),
                advice: Some("Call or text 988.".into()),
            },
            50,
        ));
        let input = PolicyInput::new(FlowKind::MentalHealth).with_severity(Severity::Urgent);
        let (value, _) = enforce(json!({"response": "I'm here.", "crisisResources": []}), &set, &input);
        assert_eq!(value["crisisDetected"], true);
        assert_eq!(value["crisisResources"], json!(["Call or text 988."]));
    }

    fn lab_set() -> PolicySet {
        PolicySet::new().with(Policy::new(
            PolicyRule::EnsurePhrase {
                when_field: "documentType".into(),
                when_values: vec!["Lab Report".into(), "Radiology Report".into()],
                targets: vec!["plainLanguageExplanation".into(), "nextStepSuggestion".into()],
                phrase: "Please review these results with your doctor.".into(),
                accept: vec!["consult your doctor".into()],
            },
            60,
        ))
    }

    #[test]
    fn lab_report_gets_consultation_phrase() {
        let output = json!({
            "documentType": "lab report",
            "plainLanguageExplanation": "Your cholesterol is slightly high",
            "nextStepSuggestion": "Eat more fibre.",
        });
        let (value, report) = enforce(output, &lab_set(), &PolicyInput::new(FlowKind::Document));
        assert_eq!(
            value["plainLanguageExplanation"],
            "Your cholesterol is slightly high. Please review these results with your doctor."
        );
        assert!(report.touched("plainLanguageExplanation"));
    }

    #[test]
    fn accepted_phrasing_satisfies_rule() {
        let output = json!({
            "documentType": "Lab Report",
            "plainLanguageExplanation": "All values are in range.",
            "nextStepSuggestion": "Consult your doctor at your next visit.",
        });
        let (_, report) = enforce(output, &lab_set(), &PolicyInput::new(FlowKind::Document));
        assert!(report.is_clean());
    }

    #[test]
    fn other_document_types_are_not_touched() {
        let output = json!({"documentType": "Prescription", "plainLanguageExplanation": "Take one daily."});
        let (_, report) = enforce(output, &lab_set(), &PolicyInput::new(FlowKind::Document));
        assert!(report.is_clean());
    }

    #[test]
    fn non_object_output_is_replaced() {
        let (value, report) = enforce(json!(["not", "an", "object"]), &symptom_set(), &input());
        assert!(value.is_object());
        assert_eq!(report.repairs[0].field, "*");
        assert_eq!(value["disclaimer"], locale::canonical_disclaimer(None));
    }

    #[test]
    fn disabled_policies_are_skipped() {
        let mut policy = Policy::new(PolicyRule::MaxItems { field: "quickSuggestions".into(), max: 1 }, 0);
        policy.enabled = false;
        let set = PolicySet::new().with(policy);
        let (value, _) = enforce(json!({"quickSuggestions": ["a", "b"]}), &set, &input());
        assert_eq!(value["quickSuggestions"], json!(["a", "b"]));
    }

    #[test]
    fn engine_logs_repairs() {
        let engine = PolicyEngine::new(symptom_set()).unwrap();
        let (_, report) = engine.enforce(json!({"response": "ok"}), &input());
        let log = engine.log();
        assert_eq!(log.len(), report.len());
        assert!(log.iter().any(|e| e.repair.field == "disclaimer"));
        assert!(log.iter().all(|e| e.flow == FlowKind::Symptom));
    }

    #[test]
    fn engine_add_remove_and_reload() {
        let engine = PolicyEngine::empty();
        assert_eq!(engine.active_count(), 0);
        engine
            .add_policy(Policy::new(PolicyRule::MaxItems { field: "quickSuggestions".into(), max: 1 }, 0).named("one"))
            .unwrap();
        let (value, _) = engine.enforce(json!({"quickSuggestions": ["a", "b"]}), &input());
        assert_eq!(value["quickSuggestions"], json!(["a"]));
        assert!(engine.remove_policy("one"));
        assert_eq!(engine.list_policies().len(), 0);

        engine.reload(symptom_set()).unwrap();
        assert_eq!(engine.active_count(), symptom_set().active_count());
    }

    #[test]
    fn repair_converts_to_violation() {
        let repair = Repair {
            policy: "list_cap:quickSuggestions".into(),
            rule: "list_cap".into(),
            field: "quickSuggestions".into(),
            detail: "truncated to 3 (dropped 2)".into(),
        };
        assert!(matches!(repair.to_violation(), FlowError::PolicyViolation { .. }));
        assert!(repair.to_violation().to_string().contains("list_cap:quickSuggestions"));
    }
}
