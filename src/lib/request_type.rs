//! Request kinds: declared statuses, the action table, payload fields and the
//! validation schema synthesized from them.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, OnceLock},
};

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    actions::{self, ActionFactory, RequestAction},
    error::{RequestError, Result},
    request::Request,
    schema::{Field, Schema, UnknownPolicy},
    validation::{ensure_action_name, ensure_type_id},
};

pub const GENERIC_TYPE_ID: &str = "reqflow.request";
pub const ACCESS_REQUEST_TYPE_ID: &str = "reqflow.access-request";
pub const INVITATION_TYPE_ID: &str = "reqflow.invitation";

pub const INITIAL_STATUS: &str = "draft";
pub const TITLE_MAX_LENGTH: usize = 250;

/// Status name to "still open" flag.
pub fn default_statuses() -> BTreeMap<String, bool> {
    [
        ("draft", true),
        ("open", true),
        ("cancelled", false),
        ("declined", false),
        ("accepted", false),
        ("expired", false),
    ]
    .into_iter()
    .map(|(status, open)| (status.to_string(), open))
    .collect()
}

/// Fields shared by every request kind.
pub fn base_request_schema() -> Schema {
    Schema::new(UnknownPolicy::Exclude)
        .field("id", Field::string().dump_only())
        .field("type", Field::string().dump_only())
        .field("title", Field::string().length(None, Some(TITLE_MAX_LENGTH)))
        .field("description", Field::string())
        .field("status", Field::string().dump_only())
        .field("is_open", Field::boolean().dump_only())
        .field("created_by", Field::reference().dump_only())
        .field("receiver", Field::reference().allow_none())
        .field("topic", Field::reference().allow_none())
        .field("payload", Field::object())
        .field("external_id", Field::string().dump_only())
        .field("created_at", Field::datetime().dump_only())
        .field("updated_at", Field::datetime().dump_only())
        .field("expires_at", Field::datetime().allow_none())
        .field("revision_id", Field::integer().dump_only())
}

pub trait ExternalIdGenerator: Send + Sync {
    fn generate(&self, request: &Request, context: &Map<String, Value>) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl ExternalIdGenerator for UuidGenerator {
    fn generate(&self, _request: &Request, _context: &Map<String, Value>) -> String {
        Uuid::new_v4().to_string()
    }
}

pub struct RequestType {
    type_id: String,
    name: String,
    statuses: BTreeMap<String, bool>,
    actions: BTreeMap<String, ActionFactory>,
    payload_fields: Option<BTreeMap<String, Field>>,
    external_ids: Arc<dyn ExternalIdGenerator>,
    schema: OnceLock<Arc<Schema>>,
}

impl RequestType {
    pub fn builder(type_id: impl Into<String>, name: impl Into<String>) -> RequestTypeBuilder {
        RequestTypeBuilder {
            type_id: type_id.into(),
            name: name.into(),
            statuses: default_statuses(),
            actions: BTreeMap::new(),
            payload_fields: None,
            external_ids: Arc::new(UuidGenerator),
        }
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn statuses(&self) -> &BTreeMap<String, bool> {
        &self.statuses
    }

    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    pub fn payload_fields(&self) -> Option<&BTreeMap<String, Field>> {
        self.payload_fields.as_ref()
    }

    pub fn is_open(&self, status: &str) -> Result<bool> {
        self.statuses
            .get(status)
            .copied()
            .ok_or_else(|| RequestError::InvalidStatus {
                type_id: self.type_id.clone(),
                status: status.to_string(),
            })
    }

    pub fn ensure_status(&self, status: &str) -> Result<()> {
        self.is_open(status).map(|_| ())
    }

    /// Handler for `action` bound to `request`.
    pub fn resolve_action(&self, action: &str, request: Request) -> Result<Box<dyn RequestAction>> {
        let factory = self
            .actions
            .get(action)
            .ok_or_else(|| RequestError::UnknownAction {
                type_id: self.type_id.clone(),
                action: action.to_string(),
            })?;
        Ok(factory.build(request))
    }

    /// Validation schema for request data of this kind. Built on first use and
    /// shared afterwards.
    pub fn schema(&self) -> Arc<Schema> {
        self.schema
            .get_or_init(|| Arc::new(self.synthesize_schema()))
            .clone()
    }

    fn synthesize_schema(&self) -> Schema {
        let base = base_request_schema();
        let Some(fields) = &self.payload_fields else {
            return base;
        };
        let payload = Schema::from_fields(fields.clone(), UnknownPolicy::Raise);
        let mut payload_field = Field::nested(payload);
        if fields.values().any(Field::is_required) {
            payload_field = payload_field.required();
        }
        base.extend([("payload", payload_field)])
    }

    pub fn generate_external_id(&self, request: &Request, context: &Map<String, Value>) -> String {
        self.external_ids.generate(request, context)
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Debug for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<RequestType '{}'>", self.name)
    }
}

pub struct RequestTypeBuilder {
    type_id: String,
    name: String,
    statuses: BTreeMap<String, bool>,
    actions: BTreeMap<String, ActionFactory>,
    payload_fields: Option<BTreeMap<String, Field>>,
    external_ids: Arc<dyn ExternalIdGenerator>,
}

impl RequestTypeBuilder {
    /// Replace the default status set.
    pub fn statuses<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        self.statuses = statuses
            .into_iter()
            .map(|(status, open)| (status.into(), open))
            .collect();
        self
    }

    pub fn status(mut self, status: impl Into<String>, open: bool) -> Self {
        self.statuses.insert(status.into(), open);
        self
    }

    pub fn action(mut self, name: impl Into<String>, factory: ActionFactory) -> Self {
        self.actions.insert(name.into(), factory);
        self
    }

    pub fn default_actions(mut self) -> Self {
        for (name, factory) in actions::default_actions() {
            self.actions.insert(name.to_string(), factory);
        }
        self
    }

    pub fn payload_field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.payload_fields
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), field);
        self
    }

    pub fn external_ids(mut self, generator: impl ExternalIdGenerator + 'static) -> Self {
        self.external_ids = Arc::new(generator);
        self
    }

    pub fn build(self) -> Result<RequestType> {
        ensure_type_id(&self.type_id)?;
        for name in self.actions.keys() {
            ensure_action_name(name)?;
        }
        if !self.statuses.contains_key(INITIAL_STATUS) {
            return Err(RequestError::Config(format!(
                "request type '{}' must declare the '{INITIAL_STATUS}' status",
                self.type_id
            )));
        }
        Ok(RequestType {
            type_id: self.type_id,
            name: self.name,
            statuses: self.statuses,
            actions: self.actions,
            payload_fields: self.payload_fields,
            external_ids: self.external_ids,
            schema: OnceLock::new(),
        })
    }
}

pub fn generic_request() -> Result<RequestType> {
    RequestType::builder(GENERIC_TYPE_ID, "Generic Request")
        .default_actions()
        .build()
}

pub fn access_request() -> Result<RequestType> {
    RequestType::builder(ACCESS_REQUEST_TYPE_ID, "Access Request")
        .default_actions()
        .payload_field("message", Field::string().length(None, Some(2000)))
        .payload_field(
            "permission",
            Field::string().required().one_of(["view", "edit", "manage"]),
        )
        .build()
}

pub fn invitation() -> Result<RequestType> {
    RequestType::builder(INVITATION_TYPE_ID, "Invitation")
        .default_actions()
        .payload_field(
            "role",
            Field::string()
                .required()
                .one_of(["reader", "curator", "manager"]),
        )
        .payload_field("message", Field::string())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_statuses_classify_open_and_closed() {
        let generic = generic_request().unwrap();
        assert!(generic.is_open("draft").unwrap());
        assert!(generic.is_open("open").unwrap());
        assert!(!generic.is_open("accepted").unwrap());
        assert!(matches!(
            generic.is_open("archived"),
            Err(RequestError::InvalidStatus { status, .. }) if status == "archived"
        ));
    }

    #[test]
    fn schema_is_memoized_per_instance() {
        let access = access_request().unwrap();
        let first = access.schema();
        let second = access.schema();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn unknown_payload_keys_are_rejected() {
        let access = access_request().unwrap();
        let data = json!({"title": "t", "payload": {"permission": "view", "colour": "red"}});
        let errors = access.schema().load(&data).unwrap_err();
        let nested = errors.get("payload").and_then(|e| e.nested()).unwrap();
        assert!(nested.contains("colour"));

        let ok = json!({"title": "t", "payload": {"permission": "edit", "message": "please"}});
        assert!(access.schema().load(&ok).is_ok());
    }

    #[test]
    fn required_payload_fields_make_payload_required() {
        let invitation = invitation().unwrap();
        let errors = invitation.schema().load(&json!({"title": "t"})).unwrap_err();
        assert!(errors.contains("payload"));
    }

    #[test]
    fn generic_schema_accepts_any_payload_object() {
        let generic = generic_request().unwrap();
        let loaded = generic
            .schema()
            .load(&json!({"payload": {"anything": 1}, "status": "accepted"}))
            .unwrap();
        assert_eq!(loaded["payload"]["anything"], 1);
        assert!(!loaded.contains_key("status"));
    }

    #[test]
    fn schema_rejects_the_same_inputs_on_every_call() {
        let access = access_request().unwrap();
        let bad = json!({"payload": {"permission": "own"}});
        for _ in 0..2 {
            assert!(access.schema().load(&bad).is_err());
        }
    }

    #[test]
    fn unknown_action_is_reported() {
        let generic = generic_request().unwrap();
        let request = Request::new("1".into(), GENERIC_TYPE_ID, "open");
        assert!(matches!(
            generic.resolve_action("archive", request),
            Err(RequestError::UnknownAction { action, .. }) if action == "archive"
        ));
    }

    #[test]
    fn external_ids_are_unique_by_default() {
        let generic = generic_request().unwrap();
        let request = Request::new("1".into(), GENERIC_TYPE_ID, "draft");
        let context = Map::new();
        assert_ne!(
            generic.generate_external_id(&request, &context),
            generic.generate_external_id(&request, &context)
        );
    }

    #[test]
    fn custom_generator_is_used() {
        struct Prefixed;
        impl ExternalIdGenerator for Prefixed {
            fn generate(&self, request: &Request, _context: &Map<String, Value>) -> String {
                format!("INV-{}", request.id)
            }
        }
        let kind = RequestType::builder("acme.invite", "Invite")
            .external_ids(Prefixed)
            .build()
            .unwrap();
        let request = Request::new("42".into(), "acme.invite", "draft");
        assert_eq!(kind.generate_external_id(&request, &Map::new()), "INV-42");
    }

    #[test]
    fn display_and_debug_use_the_name() {
        let generic = generic_request().unwrap();
        assert_eq!(generic.to_string(), "Generic Request");
        assert_eq!(format!("{generic:?}"), "<RequestType 'Generic Request'>");
    }

    #[test]
    fn status_set_must_include_initial_status() {
        let result = RequestType::builder("acme.review", "Review")
            .statuses([("pending", true), ("done", false)])
            .build();
        assert!(matches!(result, Err(RequestError::Config(_))));
    }
}
