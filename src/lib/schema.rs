use std::{collections::BTreeMap, sync::Arc};

use chrono::DateTime;
use serde::Serialize;
use serde_json::{Map, Value};

pub const MISSING_REQUIRED: &str = "Missing data for required field.";
pub const UNKNOWN_FIELD: &str = "Unknown field.";
pub const NULL_NOT_ALLOWED: &str = "Field may not be null.";
pub const INVALID_INPUT: &str = "Invalid input type.";

/// Field-level validation failures keyed by field name. Nested schemas and
/// lists report their own maps (list entries keyed by index).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, FieldError>);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldError {
    Messages(Vec<String>),
    Nested(ValidationErrors),
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        let entry = self
            .0
            .entry(field.into())
            .or_insert_with(|| FieldError::Messages(Vec::new()));
        match entry {
            FieldError::Messages(messages) => messages.push(message.into()),
            FieldError::Nested(nested) => nested.add("_schema", message),
        }
    }

    pub fn nest(&mut self, field: impl Into<String>, errors: ValidationErrors) {
        if !errors.is_empty() {
            self.0.insert(field.into(), FieldError::Nested(errors));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: &str) -> Option<&FieldError> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl FieldError {
    pub fn messages(&self) -> &[String] {
        match self {
            Self::Messages(messages) => messages,
            Self::Nested(_) => &[],
        }
    }

    pub fn nested(&self) -> Option<&ValidationErrors> {
        match self {
            Self::Nested(nested) => Some(nested),
            Self::Messages(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownPolicy {
    /// Reject keys the schema does not declare.
    Raise,
    /// Drop undeclared keys from the loaded output.
    #[default]
    Exclude,
    /// Pass undeclared keys through unchanged.
    Include,
}

#[derive(Debug, Clone)]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    Object,
    DateTime,
    /// Single-key object such as `{"user": "12"}`.
    Reference,
    List(Box<FieldKind>),
    Nested(Arc<Schema>),
}

#[derive(Debug, Clone)]
pub struct Field {
    kind: FieldKind,
    required: bool,
    allow_none: bool,
    dump_only: bool,
    min_length: Option<usize>,
    max_length: Option<usize>,
    one_of: Option<Vec<String>>,
}

impl Field {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            required: false,
            allow_none: false,
            dump_only: false,
            min_length: None,
            max_length: None,
            one_of: None,
        }
    }

    pub fn string() -> Self {
        Self::new(FieldKind::String)
    }

    pub fn integer() -> Self {
        Self::new(FieldKind::Integer)
    }

    pub fn float() -> Self {
        Self::new(FieldKind::Float)
    }

    pub fn boolean() -> Self {
        Self::new(FieldKind::Boolean)
    }

    pub fn object() -> Self {
        Self::new(FieldKind::Object)
    }

    pub fn datetime() -> Self {
        Self::new(FieldKind::DateTime)
    }

    pub fn reference() -> Self {
        Self::new(FieldKind::Reference)
    }

    pub fn list(item: FieldKind) -> Self {
        Self::new(FieldKind::List(Box::new(item)))
    }

    pub fn nested(schema: Schema) -> Self {
        Self::new(FieldKind::Nested(Arc::new(schema)))
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn allow_none(mut self) -> Self {
        self.allow_none = true;
        self
    }

    pub fn dump_only(mut self) -> Self {
        self.dump_only = true;
        self
    }

    pub fn length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    pub fn one_of<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.one_of = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_dump_only(&self) -> bool {
        self.dump_only
    }

    fn load(&self, value: &Value) -> Result<Value, FieldError> {
        if value.is_null() {
            return if self.allow_none {
                Ok(Value::Null)
            } else {
                Err(FieldError::Messages(vec![NULL_NOT_ALLOWED.to_string()]))
            };
        }

        let loaded = load_kind(&self.kind, value)?;

        let mut messages = Vec::new();
        if let Some(len) = measured_length(&loaded) {
            let too_short = self.min_length.is_some_and(|min| len < min);
            let too_long = self.max_length.is_some_and(|max| len > max);
            if too_short || too_long {
                messages.push(length_message(self.min_length, self.max_length));
            }
        }
        if let Some(choices) = &self.one_of {
            let matches = loaded
                .as_str()
                .map(|candidate| choices.iter().any(|choice| choice == candidate))
                .unwrap_or(false);
            if !matches {
                messages.push(format!("Must be one of: {}.", choices.join(", ")));
            }
        }

        if messages.is_empty() {
            Ok(loaded)
        } else {
            Err(FieldError::Messages(messages))
        }
    }
}

fn load_kind(kind: &FieldKind, value: &Value) -> Result<Value, FieldError> {
    let invalid = |message: &str| FieldError::Messages(vec![message.to_string()]);
    match kind {
        FieldKind::String => value
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(|| invalid("Not a valid string.")),
        FieldKind::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            _ => Err(invalid("Not a valid integer.")),
        },
        FieldKind::Float => match value {
            Value::Number(_) => Ok(value.clone()),
            _ => Err(invalid("Not a valid number.")),
        },
        FieldKind::Boolean => value
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| invalid("Not a valid boolean.")),
        FieldKind::Object => match value {
            Value::Object(_) => Ok(value.clone()),
            _ => Err(invalid("Not a valid mapping type.")),
        },
        FieldKind::DateTime => value
            .as_str()
            .filter(|raw| DateTime::parse_from_rfc3339(raw).is_ok())
            .map(|raw| Value::String(raw.to_string()))
            .ok_or_else(|| invalid("Not a valid datetime.")),
        FieldKind::Reference => match value {
            Value::Object(map) if map.len() == 1 => match map.values().next() {
                Some(id) if id.is_string() || id.is_number() => Ok(value.clone()),
                _ => Err(invalid("Reference id must be a string or number.")),
            },
            _ => Err(invalid("Reference must be an object with exactly one key.")),
        },
        FieldKind::List(item) => {
            let Value::Array(items) = value else {
                return Err(invalid("Not a valid list."));
            };
            let mut loaded = Vec::with_capacity(items.len());
            let mut errors = ValidationErrors::new();
            for (index, entry) in items.iter().enumerate() {
                match load_kind(item, entry) {
                    Ok(value) => loaded.push(value),
                    Err(FieldError::Messages(messages)) => {
                        for message in messages {
                            errors.add(index.to_string(), message);
                        }
                    }
                    Err(FieldError::Nested(nested)) => errors.nest(index.to_string(), nested),
                }
            }
            if errors.is_empty() {
                Ok(Value::Array(loaded))
            } else {
                Err(FieldError::Nested(errors))
            }
        }
        FieldKind::Nested(schema) => schema
            .load(value)
            .map(Value::Object)
            .map_err(FieldError::Nested),
    }
}

fn measured_length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

fn length_message(min: Option<usize>, max: Option<usize>) -> String {
    match (min, max) {
        (Some(min), Some(max)) => format!("Length must be between {min} and {max}."),
        (Some(min), None) => format!("Shorter than minimum length {min}."),
        (None, Some(max)) => format!("Longer than maximum length {max}."),
        (None, None) => String::new(),
    }
}

/// A set of named fields plus a policy for keys it does not declare.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: BTreeMap<String, Field>,
    unknown: UnknownPolicy,
}

impl Schema {
    pub fn new(unknown: UnknownPolicy) -> Self {
        Self {
            fields: BTreeMap::new(),
            unknown,
        }
    }

    pub fn from_fields<I, K>(fields: I, unknown: UnknownPolicy) -> Self
    where
        I: IntoIterator<Item = (K, Field)>,
        K: Into<String>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|(name, field)| (name.into(), field))
                .collect(),
            unknown,
        }
    }

    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    /// Copy of this schema with `extra` fields added; an extra field replaces
    /// a base field of the same name.
    pub fn extend<I, K>(&self, extra: I) -> Self
    where
        I: IntoIterator<Item = (K, Field)>,
        K: Into<String>,
    {
        let mut schema = self.clone();
        for (name, field) in extra {
            schema.fields.insert(name.into(), field);
        }
        schema
    }

    pub fn fields(&self) -> &BTreeMap<String, Field> {
        &self.fields
    }

    pub fn unknown(&self) -> UnknownPolicy {
        self.unknown
    }

    pub fn load(&self, data: &Value) -> Result<Map<String, Value>, ValidationErrors> {
        let Value::Object(input) = data else {
            return Err(ValidationErrors::single("_schema", INVALID_INPUT));
        };

        let mut output = Map::new();
        let mut errors = ValidationErrors::new();

        for (name, field) in &self.fields {
            match input.get(name) {
                Some(_) if field.dump_only => {
                    if self.unknown == UnknownPolicy::Raise {
                        errors.add(name.clone(), UNKNOWN_FIELD);
                    }
                }
                Some(value) => match field.load(value) {
                    Ok(loaded) => {
                        output.insert(name.clone(), loaded);
                    }
                    Err(FieldError::Messages(messages)) => {
                        for message in messages {
                            errors.add(name.clone(), message);
                        }
                    }
                    Err(FieldError::Nested(nested)) => errors.nest(name.clone(), nested),
                },
                None if field.required && !field.dump_only => {
                    errors.add(name.clone(), MISSING_REQUIRED);
                }
                None => {}
            }
        }

        for (key, value) in input {
            if self.fields.contains_key(key) {
                continue;
            }
            match self.unknown {
                UnknownPolicy::Raise => errors.add(key.clone(), UNKNOWN_FIELD),
                UnknownPolicy::Exclude => {}
                UnknownPolicy::Include => {
                    output.insert(key.clone(), value.clone());
                }
            }
        }

        if errors.is_empty() {
            Ok(output)
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload_schema() -> Schema {
        Schema::new(UnknownPolicy::Raise)
            .field("content", Field::string().required().length(Some(1), Some(10)))
            .field("format", Field::string().one_of(["html", "text"]))
    }

    #[test]
    fn loads_declared_fields_and_reports_missing_required() {
        let schema = payload_schema();
        let loaded = schema
            .load(&json!({"content": "hello", "format": "html"}))
            .expect("valid payload");
        assert_eq!(loaded["content"], "hello");

        let errors = schema.load(&json!({"format": "text"})).unwrap_err();
        assert_eq!(
            errors.get("content").unwrap().messages().to_vec(),
            vec![MISSING_REQUIRED.to_string()]
        );
    }

    #[test]
    fn raise_policy_rejects_unknown_keys() {
        let errors = payload_schema()
            .load(&json!({"content": "hi", "colour": "red"}))
            .unwrap_err();
        assert_eq!(
            errors.get("colour").unwrap().messages().to_vec(),
            vec![UNKNOWN_FIELD.to_string()]
        );
    }

    #[test]
    fn exclude_policy_drops_unknown_keys() {
        let schema = Schema::new(UnknownPolicy::Exclude).field("title", Field::string());
        let loaded = schema
            .load(&json!({"title": "t", "extra": 1}))
            .expect("unknown keys are dropped");
        assert!(loaded.contains_key("title"));
        assert!(!loaded.contains_key("extra"));
    }

    #[test]
    fn nested_errors_are_reported_under_the_parent_field() {
        let schema = Schema::new(UnknownPolicy::Exclude)
            .field("payload", Field::nested(payload_schema()));
        let errors = schema
            .load(&json!({"payload": {"content": "", "format": "pdf"}}))
            .unwrap_err();
        let nested = errors.get("payload").unwrap().nested().unwrap();
        assert!(nested.contains("content"));
        assert!(nested.contains("format"));
    }

    #[test]
    fn list_items_are_validated_by_index() {
        let schema =
            Schema::new(UnknownPolicy::Raise).field("tags", Field::list(FieldKind::String));
        let errors = schema.load(&json!({"tags": ["a", 3]})).unwrap_err();
        let nested = errors.get("tags").unwrap().nested().unwrap();
        assert!(nested.contains("1"));
        assert!(!nested.contains("0"));
    }

    #[test]
    fn dump_only_fields_are_not_loaded() {
        let schema = Schema::new(UnknownPolicy::Exclude)
            .field("id", Field::string().dump_only())
            .field("title", Field::string());
        let loaded = schema.load(&json!({"id": "x", "title": "t"})).unwrap();
        assert!(!loaded.contains_key("id"));
    }

    #[test]
    fn null_requires_allow_none() {
        let schema = Schema::new(UnknownPolicy::Raise)
            .field("a", Field::string())
            .field("b", Field::string().allow_none());
        let errors = schema.load(&json!({"a": null, "b": null})).unwrap_err();
        assert!(errors.contains("a"));
        assert!(!errors.contains("b"));
    }

    #[test]
    fn references_and_datetimes_are_checked() {
        let schema = Schema::new(UnknownPolicy::Raise)
            .field("receiver", Field::reference())
            .field("expires_at", Field::datetime());
        schema
            .load(&json!({"receiver": {"user": "1"}, "expires_at": "2026-01-01T00:00:00Z"}))
            .expect("valid reference and datetime");
        let errors = schema
            .load(&json!({"receiver": {"user": "1", "group": "2"}, "expires_at": "soon"}))
            .unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn non_object_input_is_rejected() {
        let errors = payload_schema().load(&json!(["content"])).unwrap_err();
        assert!(errors.contains("_schema"));
    }
}
