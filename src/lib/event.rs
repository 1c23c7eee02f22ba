use std::{convert::Infallible, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::store::Record;

pub const DEFAULT_CONTENT_FORMAT: &str = "html";

/// Tag stored on every timeline entry. The set is open: system events that are
/// not listed here round-trip through `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestEventType {
    Comment,
    Accepted,
    Declined,
    Cancelled,
    Expired,
    Removed,
    Other(String),
}

impl RequestEventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Comment => "comment",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Removed => "removed",
            Self::Other(tag) => tag,
        }
    }

    pub fn is_comment(&self) -> bool {
        matches!(self, Self::Comment)
    }
}

impl FromStr for RequestEventType {
    type Err = Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "comment" => Self::Comment,
            "accepted" => Self::Accepted,
            "declined" => Self::Declined,
            "cancelled" => Self::Cancelled,
            "expired" => Self::Expired,
            "removed" => Self::Removed,
            other => Self::Other(other.to_string()),
        })
    }
}

impl From<&str> for RequestEventType {
    fn from(value: &str) -> Self {
        match value.parse() {
            Ok(parsed) => parsed,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for RequestEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RequestEventType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RequestEventType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Self::from(value.as_str()))
    }
}

/// One entry in a request's timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestEvent {
    pub id: String,
    pub request_id: String,
    #[serde(rename = "type")]
    pub event_type: RequestEventType,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub revision_id: u64,
}

fn default_format() -> String {
    DEFAULT_CONTENT_FORMAT.to_string()
}

impl RequestEvent {
    pub fn new(id: String, request_id: impl Into<String>, event_type: RequestEventType) -> Self {
        let now = Utc::now();
        Self {
            id,
            request_id: request_id.into(),
            event_type,
            content: String::new(),
            format: default_format(),
            created_by: None,
            created_at: now,
            updated_at: now,
            revision_id: 0,
        }
    }

    /// Redact a comment in place. The entry stays in the timeline as `removed`.
    pub fn redact(&mut self) {
        self.event_type = RequestEventType::Removed;
        self.content.clear();
        self.updated_at = Utc::now();
    }
}

impl Record for RequestEvent {
    const KIND: &'static str = "event";

    fn id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.request_id)
    }

    fn revision_id(&self) -> u64 {
        self.revision_id
    }

    fn set_revision_id(&mut self, revision_id: u64) {
        self.revision_id = revision_id;
    }
}
