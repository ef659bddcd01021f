//! Output contracts: the typed shape every flow response must have.
//!
//! A contract drives three things: the JSON schema sent to the primary
//! backend, the skeleton the normalizer fills from freeform text, and the
//! structural check that separates a usable answer from malformed output.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Scalar type of an object property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scalar {
    String,
    Number,
    Integer,
    Boolean,
}

impl Scalar {
    fn schema_type(&self) -> &'static str {
        match self {
            Scalar::String => "string",
            Scalar::Number => "number",
            Scalar::Integer => "integer",
            Scalar::Boolean => "boolean",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            Scalar::String => value.is_string(),
            Scalar::Number => value.is_number(),
            Scalar::Integer => value.is_i64() || value.is_u64(),
            Scalar::Boolean => value.is_boolean(),
        }
    }
}

/// A property of an object-typed field or list item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub scalar: Scalar,
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

impl Property {
    pub fn string(name: &str) -> Self {
        Self { name: name.into(), scalar: Scalar::String, required: true }
    }

    pub fn number(name: &str) -> Self {
        Self { name: name.into(), scalar: Scalar::Number, required: true }
    }

    pub fn integer(name: &str) -> Self {
        Self { name: name.into(), scalar: Scalar::Integer, required: true }
    }

    pub fn boolean(name: &str) -> Self {
        Self { name: name.into(), scalar: Scalar::Boolean, required: true }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// What a list holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemKind {
    Text,
    Object { properties: Vec<Property> },
}

/// The kind of a top-level contract field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Flag,
    List { max: usize, item: ItemKind },
    Object { properties: Vec<Property> },
    Enum { values: Vec<String> },
}

/// One top-level field of a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractField {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

/// The typed response contract of one flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputContract {
    /// Contract name (e.g. "symptom_assessment")
    pub name: String,

    /// The text field that carries the main answer
    pub primary_field: String,

    pub fields: Vec<ContractField>,
}

impl OutputContract {
    pub fn new(name: impl Into<String>, primary_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_field: primary_field.into(),
            fields: Vec::new(),
        }
    }

    fn push(mut self, name: &str, kind: FieldKind, required: bool, description: &str) -> Self {
        self.fields.retain(|f| f.name != name);
        self.fields.push(ContractField {
            name: name.into(),
            kind,
            required,
            description: description.into(),
        });
        self
    }

    /// A required text field.
    pub fn text(self, name: &str, description: &str) -> Self {
        self.push(name, FieldKind::Text, true, description)
    }

    /// A text field that may be null.
    pub fn optional_text(self, name: &str, description: &str) -> Self {
        self.push(name, FieldKind::Text, false, description)
    }

    /// A boolean flag; defaults to `false`.
    pub fn flag(self, name: &str, description: &str) -> Self {
        self.push(name, FieldKind::Flag, true, description)
    }

    /// A bounded list of strings.
    pub fn list(self, name: &str, max: usize, description: &str) -> Self {
        self.push(name, FieldKind::List { max, item: ItemKind::Text }, true, description)
    }

    /// A bounded list of objects.
    pub fn object_list(self, name: &str, max: usize, properties: Vec<Property>, description: &str) -> Self {
        self.push(
            name,
            FieldKind::List { max, item: ItemKind::Object { properties } },
            true,
            description,
        )
    }

    /// An optional object.
    pub fn object(self, name: &str, properties: Vec<Property>, description: &str) -> Self {
        self.push(name, FieldKind::Object { properties }, false, description)
    }

    /// A closed set of string values. List the catch-all value last.
    pub fn enumeration(self, name: &str, values: &[&str], description: &str) -> Self {
        let values = values.iter().map(|v| v.to_string()).collect();
        self.push(name, FieldKind::Enum { values }, true, description)
    }

    pub fn field(&self, name: &str) -> Option<&ContractField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// `(field, max)` for every bounded list.
    pub fn list_caps(&self) -> Vec<(String, usize)> {
        self.fields
            .iter()
            .filter_map(|f| match f.kind {
                FieldKind::List { max, .. } => Some((f.name.clone(), max)),
                _ => None,
            })
            .collect()
    }

    /// Names of every text field, primary first.
    pub fn text_fields(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::Text))
            .map(|f| f.name.clone())
            .collect();
        if let Some(pos) = names.iter().position(|n| *n == self.primary_field) {
            let primary = names.remove(pos);
            names.insert(0, primary);
        }
        names
    }

    /// The JSON schema handed to a schema-constrained backend.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            let mut schema = field_schema(&field.kind);
            if !field.description.is_empty() {
                schema["description"] = json!(field.description);
            }
            if field.required {
                required.push(json!(field.name));
            } else {
                schema["nullable"] = json!(true);
            }
            properties.insert(field.name.clone(), schema);
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// A value that satisfies the contract structurally with nothing in it:
    /// empty strings, `false` flags, empty lists, `null` optionals, and the
    /// catch-all enum value.
    pub fn skeleton(&self) -> Value {
        let mut out = Map::new();
        for field in &self.fields {
            out.insert(field.name.clone(), default_for(field));
        }
        Value::Object(out)
    }

    /// Fill in every field that is missing or null with its skeleton value.
    /// Present values are left alone.
    pub fn fill_missing(&self, value: &mut Value) {
        let Some(obj) = value.as_object_mut() else {
            return;
        };
        for field in &self.fields {
            let missing = obj.get(&field.name).is_none_or(Value::is_null);
            if missing && field.required {
                obj.insert(field.name.clone(), default_for(field));
            } else if missing {
                obj.insert(field.name.clone(), Value::Null);
            }
        }
    }

    /// Structural check of a backend answer.
    ///
    /// Missing optional fields and oversized lists are not errors here; the
    /// policy layer repairs those. A non-object, a missing primary text, or a
    /// present field of the wrong type is.
    pub fn validate(&self, value: &Value) -> std::result::Result<(), Vec<String>> {
        let Some(obj) = value.as_object() else {
            return Err(vec!["output is not a JSON object".into()]);
        };

        let mut problems = Vec::new();
        match obj.get(&self.primary_field) {
            Some(Value::String(_)) => {}
            Some(other) => problems.push(format!(
                "primary field '{}' must be a string, got {}",
                self.primary_field,
                type_name(other)
            )),
            None => problems.push(format!("primary field '{}' is missing", self.primary_field)),
        }

        for field in &self.fields {
            let Some(value) = obj.get(&field.name) else { continue };
            if value.is_null() || field.name == self.primary_field {
                continue;
            }
            if let Err(problem) = check_kind(&field.kind, value) {
                problems.push(format!("field '{}': {problem}", field.name));
            }
        }

        if problems.is_empty() { Ok(()) } else { Err(problems) }
    }
}

fn object_schema(properties: &[Property]) -> Value {
    let mut props = Map::new();
    let mut required = Vec::new();
    for p in properties {
        props.insert(p.name.clone(), json!({ "type": p.scalar.schema_type() }));
        if p.required {
            required.push(json!(p.name));
        }
    }
    json!({ "type": "object", "properties": props, "required": required })
}

fn field_schema(kind: &FieldKind) -> Value {
    match kind {
        FieldKind::Text => json!({ "type": "string" }),
        FieldKind::Flag => json!({ "type": "boolean" }),
        FieldKind::List { max, item } => {
            let items = match item {
                ItemKind::Text => json!({ "type": "string" }),
                ItemKind::Object { properties } => object_schema(properties),
            };
            json!({ "type": "array", "items": items, "maxItems": max })
        }
        FieldKind::Object { properties } => object_schema(properties),
        FieldKind::Enum { values } => json!({ "type": "string", "enum": values }),
    }
}

fn default_for(field: &ContractField) -> Value {
    match &field.kind {
        FieldKind::Text if field.required => json!(""),
        FieldKind::Flag => json!(false),
        FieldKind::List { .. } => json!([]),
        FieldKind::Enum { values } => values.last().map(|v| json!(v)).unwrap_or(Value::Null),
        FieldKind::Text | FieldKind::Object { .. } => Value::Null,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn check_object(properties: &[Property], value: &Value) -> std::result::Result<(), String> {
    let Some(obj) = value.as_object() else {
        return Err(format!("expected object, got {}", type_name(value)));
    };
    for p in properties {
        match obj.get(&p.name) {
            Some(v) if v.is_null() && !p.required => {}
            Some(v) if !p.scalar.accepts(v) => {
                return Err(format!("property '{}' expected {}, got {}", p.name, p.scalar.schema_type(), type_name(v)));
            }
            None if p.required => return Err(format!("property '{}' is missing", p.name)),
            _ => {}
        }
    }
    Ok(())
}

fn check_kind(kind: &FieldKind, value: &Value) -> std::result::Result<(), String> {
    match kind {
        FieldKind::Text if value.is_string() => Ok(()),
        FieldKind::Flag if value.is_boolean() => Ok(()),
        FieldKind::Text => Err(format!("expected string, got {}", type_name(value))),
        FieldKind::Flag => Err(format!("expected boolean, got {}", type_name(value))),
        FieldKind::List { item, .. } => {
            let Some(items) = value.as_array() else {
                return Err(format!("expected array, got {}", type_name(value)));
            };
            for item_value in items {
                match item {
                    ItemKind::Text if !item_value.is_string() => {
                        return Err(format!("list item expected string, got {}", type_name(item_value)));
                    }
                    ItemKind::Object { properties } => check_object(properties, item_value)?,
                    _ => {}
                }
            }
            Ok(())
        }
        FieldKind::Object { properties } => check_object(properties, value),
        FieldKind::Enum { values } => match value.as_str() {
            Some(s) if values.iter().any(|v| v.eq_ignore_ascii_case(s)) => Ok(()),
            Some(s) => Err(format!("'{s}' is not one of {values:?}")),
            None => Err(format!("expected string, got {}", type_name(value))),
        },
    }
}
