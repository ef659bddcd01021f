//! Policy data model: the rules that every flow response must satisfy.

use healthflow_config::PolicyConfig;
use healthflow_core::contract::{FieldKind, OutputContract};
use healthflow_core::flow::FlowKind;
use serde::{Deserialize, Serialize};

/// A predicate over a flow output plus the repair applied when it fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyRule {
    /// The field must start with the canonical disclaimer for the locale.
    Disclaimer { field: String },

    /// The list field holds at most `max` items. Truncates, never expands.
    #[serde(rename = "list_cap", alias = "max_items")]
    MaxItems { field: String, max: usize },

    /// The text field is never empty.
    RequiredText { field: String, fallback: String },

    /// When `when_field` equals one of `when_values` (case-insensitive), one of
    /// `targets` must mention `phrase` or one of `accept`; otherwise `phrase`
    /// is appended to the first target.
    EnsurePhrase {
        when_field: String,
        when_values: Vec<String>,
        targets: Vec<String>,
        phrase: String,
        #[serde(default)]
        accept: Vec<String>,
    },

    /// Missing or null list fields become `[]`.
    EnsureList { fields: Vec<String> },

    /// For urgent requests the flag is forced on; whenever the flag is on,
    /// `advice_field` is never empty. `advice` defaults to the locale's
    /// canonical emergency advice.
    EmergencyEscalation {
        flag: String,
        advice_field: String,
        #[serde(default)]
        advice: Option<String>,
    },

    /// Markdown emphasis is removed from the fields.
    StripMarkdown { fields: Vec<String> },
}

impl PolicyRule {
    /// The wire name of the rule type.
    pub fn kind(&self) -> &'static str {
        match self {
            PolicyRule::Disclaimer { .. } => "disclaimer",
            PolicyRule::MaxItems { .. } => "list_cap",
            PolicyRule::RequiredText { .. } => "required_text",
            PolicyRule::EnsurePhrase { .. } => "ensure_phrase",
            PolicyRule::EnsureList { .. } => "ensure_list",
            PolicyRule::EmergencyEscalation { .. } => "emergency_escalation",
            PolicyRule::StripMarkdown { .. } => "strip_markdown",
        }
    }

    /// Every output field the rule reads or writes.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            PolicyRule::Disclaimer { field }
            | PolicyRule::MaxItems { field, .. }
            | PolicyRule::RequiredText { field, .. } => vec![field.as_str()],
            PolicyRule::EnsurePhrase { when_field, targets, .. } => std::iter::once(when_field.as_str())
                .chain(targets.iter().map(String::as_str))
                .collect(),
            PolicyRule::EnsureList { fields } | PolicyRule::StripMarkdown { fields } => {
                fields.iter().map(String::as_str).collect()
            }
            PolicyRule::EmergencyEscalation { flag, advice_field, .. } => {
                vec![flag.as_str(), advice_field.as_str()]
            }
        }
    }
}

/// A named, prioritised rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Unique name within a set. Defaults to `<type>:<first field>`.
    #[serde(default)]
    pub name: String,

    #[serde(flatten)]
    pub rule: PolicyRule,

    /// Lower runs first. Ties keep insertion order.
    #[serde(default = "default_priority")]
    pub priority: i32,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_priority() -> i32 {
    50
}

fn default_true() -> bool {
    true
}

impl Policy {
    pub fn new(rule: PolicyRule, priority: i32) -> Self {
        let mut policy = Self {
            name: String::new(),
            rule,
            priority,
            enabled: true,
        };
        policy.name = policy.default_name();
        policy
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn default_name(&self) -> String {
        match self.rule.fields().first() {
            Some(field) => format!("{}:{field}", self.rule.kind()),
            None => self.rule.kind().to_string(),
        }
    }

    /// Validate that the policy is well-formed.
    pub fn validate(&self) -> Result<(), crate::PolicyError> {
        let invalid = |reason: &str| crate::PolicyError::InvalidPolicy {
            name: self.name.clone(),
            reason: reason.into(),
        };
        if self.rule.fields().iter().any(|f| f.trim().is_empty()) {
            return Err(invalid("field names cannot be empty"));
        }
        match &self.rule {
            PolicyRule::EnsurePhrase { targets, phrase, when_values, .. } => {
                if targets.is_empty() {
                    return Err(invalid("ensure_phrase needs at least one target"));
                }
                if phrase.trim().is_empty() {
                    return Err(invalid("ensure_phrase phrase cannot be empty"));
                }
                if when_values.is_empty() {
                    return Err(invalid("ensure_phrase needs at least one trigger value"));
                }
            }
            PolicyRule::RequiredText { fallback, .. } if fallback.trim().is_empty() => {
                return Err(invalid("required_text fallback cannot be empty"));
            }
            PolicyRule::EnsureList { fields } | PolicyRule::StripMarkdown { fields } if fields.is_empty() => {
                return Err(invalid("rule needs at least one field"));
            }
            _ => {}
        }
        Ok(())
    }

    /// Check that every field the rule touches exists in the contract.
    pub fn validate_against(&self, contract: &OutputContract) -> Result<(), crate::PolicyError> {
        for field in self.rule.fields() {
            if contract.field(field).is_none() {
                return Err(crate::PolicyError::UnknownField {
                    name: self.name.clone(),
                    field: field.to_string(),
                    contract: contract.name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// An ordered collection of policies for one flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicySet {
    #[serde(default)]
    pub policies: Vec<Policy>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load policies from a TOML string (`[[policies]]` tables).
    pub fn from_toml(toml_str: &str) -> Result<Self, crate::PolicyError> {
        let mut set: PolicySet = toml::from_str(toml_str)?;
        set.fill_names();
        set.validate()?;
        Ok(set)
    }

    /// The extra policies from config that apply to `flow`.
    pub fn from_config(configs: &[PolicyConfig], flow: FlowKind) -> Result<Self, crate::PolicyError> {
        let mut set = PolicySet::new();
        for config in configs.iter().filter(|c| c.applies_to(flow)) {
            let policy: Policy = serde_json::from_value(serde_json::Value::Object(config.rule.clone()))?;
            set.policies.push(policy);
        }
        set.fill_names();
        set.validate()?;
        Ok(set)
    }

    /// Rules every contract gets: lists present and capped, text free of
    /// markdown, primary field non-empty, and the disclaimer (if the
    /// contract has one) canonical.
    pub fn baseline(contract: &OutputContract) -> Self {
        let mut set = PolicySet::new();
        let lists: Vec<String> = contract
            .fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::List { .. }))
            .map(|f| f.name.clone())
            .collect();
        if !lists.is_empty() {
            set.add(Policy::new(PolicyRule::EnsureList { fields: lists }, 10));
        }
        for (field, max) in contract.list_caps() {
            set.add(Policy::new(PolicyRule::MaxItems { field, max }, 20));
        }
        let text: Vec<String> = contract
            .text_fields()
            .into_iter()
            .filter(|f| f != "disclaimer")
            .collect();
        if !text.is_empty() {
            set.add(Policy::new(PolicyRule::StripMarkdown { fields: text }, 30));
        }
        set.add(Policy::new(
            PolicyRule::RequiredText {
                field: contract.primary_field.clone(),
                fallback: crate::locale::apology(None).to_string(),
            },
            40,
        ));
        if contract.field("disclaimer").is_some() {
            set.add(Policy::new(PolicyRule::Disclaimer { field: "disclaimer".into() }, 90));
        }
        set
    }

    /// Add a policy. A policy with the same name is replaced.
    pub fn add(&mut self, policy: Policy) {
        self.policies.retain(|p| p.name != policy.name);
        self.policies.push(policy);
    }

    pub fn with(mut self, policy: Policy) -> Self {
        self.add(policy);
        self
    }

    /// Append every policy of `other`, replacing same-named ones.
    pub fn extend(&mut self, other: PolicySet) {
        for policy in other.policies {
            self.add(policy);
        }
    }

    /// Remove a policy by name.  Returns `true` if found.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.policies.len();
        self.policies.retain(|p| p.name != name);
        self.policies.len() < before
    }

    pub fn validate(&self) -> Result<(), crate::PolicyError> {
        for policy in &self.policies {
            policy.validate()?;
        }
        Ok(())
    }

    pub fn validate_against(&self, contract: &OutputContract) -> Result<(), crate::PolicyError> {
        for policy in &self.policies {
            policy.validate_against(contract)?;
        }
        Ok(())
    }

    /// Enabled policies in execution order.
    pub fn ordered(&self) -> Vec<&Policy> {
        let mut active: Vec<&Policy> = self.policies.iter().filter(|p| p.enabled).collect();
        active.sort_by_key(|p| p.priority);
        active
    }

    pub fn active_count(&self) -> usize {
        self.policies.iter().filter(|p| p.enabled).count()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    fn fill_names(&mut self) {
        for policy in &mut self.policies {
            if policy.name.is_empty() {
                policy.name = policy.default_name();
            }
        }
    }
}
