//! Maps freeform backend text onto an output contract.

use healthflow_core::contract::{FieldKind, OutputContract};
use healthflow_policy::text::strip_markdown;
use serde_json::{Value, json};

/// A contract-shaped value whose primary field holds the raw text.
///
/// Lists are empty, flags false, optional fields null and enums take their
/// catch-all (last) value. Markdown emphasis is stripped from the text.
pub fn normalize(raw: &str, contract: &OutputContract) -> Value {
    let mut value = contract.skeleton();
    let text = strip_markdown(raw.trim());
    if let Some(obj) = value.as_object_mut() {
        obj.insert(contract.primary_field.clone(), json!(text.trim()));
    }
    value
}

/// Rewrite enum fields to their canonical spelling. Unknown or non-string
/// values become the catch-all. Returns the names of fields that changed.
pub fn canonicalize_enums(value: &mut Value, contract: &OutputContract) -> Vec<String> {
    let Some(obj) = value.as_object_mut() else {
        return Vec::new();
    };
    let mut changed = Vec::new();
    for field in &contract.fields {
        let FieldKind::Enum { values } = &field.kind else {
            continue;
        };
        let Some(catch_all) = values.last() else {
            continue;
        };
        let current = obj.get(&field.name);
        let canonical = current
            .and_then(Value::as_str)
            .and_then(|s| values.iter().find(|v| v.eq_ignore_ascii_case(s.trim())))
            .unwrap_or(catch_all);
        if current.and_then(Value::as_str) != Some(canonical.as_str()) {
            obj.insert(field.name.clone(), json!(canonical));
            changed.push(field.name.clone());
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> OutputContract {
        OutputContract::new("doc", "summary")
            .enumeration("documentType", &["Lab Report", "Prescription", "Other"], "")
            .text("summary", "")
            .flag("urgent", "")
            .list("keyFindings", 8, "")
            .optional_text("note", "")
    }

    #[test]
    fn raw_text_lands_in_primary_field() {
        let value = normalize("  **Your results** look normal.  ", &contract());
        assert_eq!(value["summary"], "Your results look normal.");
        assert_eq!(value["keyFindings"], json!([]));
        assert_eq!(value["urgent"], false);
        assert!(value["note"].is_null());
        assert_eq!(value["documentType"], "Other");
        assert!(contract().validate(&value).is_ok());
    }

    #[test]
    fn enums_are_canonicalized() {
        let mut value = json!({"documentType": "lab report", "summary": "x"});
        assert_eq!(canonicalize_enums(&mut value, &contract()), vec!["documentType"]);
        assert_eq!(value["documentType"], "Lab Report");

        let mut value = json!({"documentType": "Discharge Summary"});
        canonicalize_enums(&mut value, &contract());
        assert_eq!(value["documentType"], "Other");

        let mut value = json!({"documentType": "Prescription"});
        assert!(canonicalize_enums(&mut value, &contract()).is_empty());
    }
}
