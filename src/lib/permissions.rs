//! Permission names, identities and the policy that decides them.
//!
//! Services only ever name the permission they need; whether it holds is up to
//! the configured [`PermissionPolicy`]. The default [`GrantPolicy`] matches the
//! permission against the wildcard grants carried by the caller's token.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    error::{RequestError, Result},
    event::{RequestEvent, RequestEventType},
    request::Request,
};

pub const READ: &str = "read";
pub const CREATE: &str = "create";
pub const UPDATE: &str = "update";
pub const DELETE: &str = "delete";
pub const SEARCH: &str = "search";
pub const READ_EVENT: &str = "read_event";

pub const WILDCARD_GRANT: &str = "*";
/// Grants with this prefix only apply to records the caller created.
pub const OWNER_PREFIX: &str = "own:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Create,
    Update,
    Delete,
}

impl EventAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permission guarding a create/update/delete of a timeline entry.
pub fn event_permission(action: EventAction, event_type: &RequestEventType) -> String {
    match event_type {
        RequestEventType::Comment => format!("{action}_event_comment"),
        RequestEventType::Accepted => "accept".to_string(),
        RequestEventType::Declined => "decline".to_string(),
        RequestEventType::Cancelled => "cancel".to_string(),
        _ => format!("{action}_event"),
    }
}

/// Permission guarding execution of a named request action.
pub fn action_permission(action: &str) -> String {
    format!("action_{action}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub grants: Vec<String>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            id: None,
            grants: Vec::new(),
        }
    }

    pub fn user(id: impl Into<String>, grants: Vec<String>) -> Self {
        Self {
            id: Some(id.into()),
            grants,
        }
    }

    pub fn system() -> Self {
        Self::user("system", vec![WILDCARD_GRANT.to_string()])
    }

    pub fn is_anonymous(&self) -> bool {
        self.id.is_none()
    }

    /// Entity reference stored in `created_by` fields.
    pub fn reference(&self) -> Option<Value> {
        self.id.as_ref().map(|id| json!({ "user": id }))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionContext<'a> {
    pub request: Option<&'a Request>,
    pub event: Option<&'a RequestEvent>,
}

impl<'a> PermissionContext<'a> {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn request(request: &'a Request) -> Self {
        Self {
            request: Some(request),
            event: None,
        }
    }

    pub fn event(request: &'a Request, event: &'a RequestEvent) -> Self {
        Self {
            request: Some(request),
            event: Some(event),
        }
    }

    fn owner(&self) -> Option<&'a Value> {
        match (self.event, self.request) {
            (Some(event), _) => event.created_by.as_ref(),
            (None, Some(request)) => request.created_by.as_ref(),
            (None, None) => None,
        }
    }
}

pub trait PermissionPolicy: Send + Sync {
    fn check(&self, identity: &Identity, permission: &str, context: PermissionContext<'_>) -> bool;
}

/// Grants are permission-name patterns (`*` and `?` wildcards). An
/// `own:`-prefixed grant only matches when the caller created the record in
/// context (the event if there is one, the request otherwise).
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantPolicy;

impl PermissionPolicy for GrantPolicy {
    fn check(&self, identity: &Identity, permission: &str, context: PermissionContext<'_>) -> bool {
        identity.grants.iter().any(|grant| match grant.strip_prefix(OWNER_PREFIX) {
            Some(pattern) => {
                wildcard_matches(pattern, permission)
                    && identity.reference().as_ref().is_some_and(|me| {
                        context.owner().is_some_and(|owner| owner == me)
                    })
            }
            None => wildcard_matches(grant, permission),
        })
    }
}

pub fn require_permission(
    policy: &dyn PermissionPolicy,
    identity: &Identity,
    permission: &str,
    context: PermissionContext<'_>,
) -> Result<()> {
    if policy.check(identity, permission, context) {
        Ok(())
    } else {
        Err(RequestError::PermissionDenied(permission.to_string()))
    }
}

pub fn wildcard_matches(pattern: &str, candidate: &str) -> bool {
    if pattern == WILDCARD_GRANT {
        return true;
    }
    let pattern_chars = pattern.chars().collect::<Vec<_>>();
    let text_chars = candidate.chars().collect::<Vec<_>>();
    let (mut p_idx, mut t_idx) = (0usize, 0usize);
    let mut star_idx: Option<usize> = None;
    let mut match_idx = 0usize;

    while t_idx < text_chars.len() {
        if p_idx < pattern_chars.len()
            && (pattern_chars[p_idx] == text_chars[t_idx] || pattern_chars[p_idx] == '?')
        {
            p_idx += 1;
            t_idx += 1;
        } else if p_idx < pattern_chars.len() && pattern_chars[p_idx] == '*' {
            star_idx = Some(p_idx);
            match_idx = t_idx;
            p_idx += 1;
        } else if let Some(star) = star_idx {
            p_idx = star + 1;
            match_idx += 1;
            t_idx = match_idx;
        } else {
            return false;
        }
    }

    while p_idx < pattern_chars.len() && pattern_chars[p_idx] == '*' {
        p_idx += 1;
    }

    p_idx == pattern_chars.len()
}
