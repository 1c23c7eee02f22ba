use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::Record;

/// A persisted workflow entity. Behaviour (statuses, actions, payload shape)
/// comes from the `RequestType` named by `type_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: String,
    #[serde(rename = "type")]
    pub type_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<Value>,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub external_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revision_id: u64,
}

impl Request {
    pub fn new(id: String, type_id: impl Into<String>, status: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            type_id: type_id.into(),
            title: String::new(),
            description: String::new(),
            status: status.into(),
            created_by: None,
            receiver: None,
            topic: None,
            payload: Map::new(),
            external_id: String::new(),
            created_at: now,
            updated_at: now,
            expires_at: None,
            revision_id: 0,
        }
    }

    /// Copy the loaded (already validated) fields onto the record. Keys absent
    /// from `data` keep their current value.
    pub fn apply(&mut self, data: &Map<String, Value>) {
        if let Some(title) = data.get("title").and_then(Value::as_str) {
            self.title = title.to_string();
        }
        if let Some(description) = data.get("description").and_then(Value::as_str) {
            self.description = description.to_string();
        }
        if let Some(receiver) = data.get("receiver") {
            self.receiver = non_null(receiver);
        }
        if let Some(topic) = data.get("topic") {
            self.topic = non_null(topic);
        }
        if let Some(Value::Object(payload)) = data.get("payload") {
            self.payload = payload.clone();
        }
        if let Some(expires_at) = data.get("expires_at") {
            self.expires_at = expires_at
                .as_str()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|ts| ts.with_timezone(&Utc));
        }
    }
}

fn non_null(value: &Value) -> Option<Value> {
    if value.is_null() {
        None
    } else {
        Some(value.clone())
    }
}

impl Record for Request {
    const KIND: &'static str = "request";

    fn id(&self) -> &str {
        &self.id
    }

    fn revision_id(&self) -> u64 {
        self.revision_id
    }

    fn set_revision_id(&mut self, revision_id: u64) {
        self.revision_id = revision_id;
    }
}
