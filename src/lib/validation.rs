use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    error::{RequestError, Result},
    schema::ValidationErrors,
};

pub const MAX_RECORD_ID_LENGTH: usize = 64;
pub const MAX_EVENT_CONTENT_BYTES: usize = 64 * 1024;

static TYPE_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z][a-z0-9_-]*(?:\.[a-z][a-z0-9_-]*)+$").expect("valid type_id regex")
});
static ACTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid action regex"));
static RECORD_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("valid record id regex"));

/// Type identifiers are dotted, lowercase and prefixed by their package,
/// e.g. `reqflow.access-request`.
pub fn ensure_type_id(value: &str) -> Result<()> {
    if TYPE_ID_RE.is_match(value) {
        Ok(())
    } else {
        Err(RequestError::Config(format!(
            "type_id '{value}' must be a dotted lowercase identifier"
        )))
    }
}

pub fn ensure_action_name(value: &str) -> Result<()> {
    if ACTION_RE.is_match(value) {
        Ok(())
    } else {
        Err(RequestError::Config(format!(
            "action '{value}' must be lowercase snake_case"
        )))
    }
}

/// Identifiers arriving from URLs; anything malformed is reported as not found
/// by the caller rather than reaching the store.
pub fn is_valid_record_id(value: &str) -> bool {
    !value.is_empty() && value.len() <= MAX_RECORD_ID_LENGTH && RECORD_ID_RE.is_match(value)
}

pub fn ensure_content_size(content: &str) -> Result<()> {
    if content.len() > MAX_EVENT_CONTENT_BYTES {
        return Err(RequestError::Validation(ValidationErrors::single(
            "content",
            format!("Longer than maximum size of {MAX_EVENT_CONTENT_BYTES} bytes."),
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_ids_require_a_package_prefix() {
        ensure_type_id("reqflow.request").expect("dotted id");
        ensure_type_id("acme.access-request").expect("hyphen allowed");
        assert!(matches!(
            ensure_type_id("request"),
            Err(RequestError::Config(_))
        ));
        assert!(matches!(
            ensure_type_id("Acme.Request"),
            Err(RequestError::Config(_))
        ));
    }

    #[test]
    fn action_names_are_snake_case() {
        ensure_action_name("accept").expect("valid");
        ensure_action_name("request_changes").expect("valid");
        assert!(ensure_action_name("Accept").is_err());
        assert!(ensure_action_name("re-open").is_err());
    }

    #[test]
    fn record_ids_reject_path_characters() {
        assert!(is_valid_record_id("1234567890"));
        assert!(!is_valid_record_id(""));
        assert!(!is_valid_record_id("../etc"));
        assert!(!is_valid_record_id(&"x".repeat(MAX_RECORD_ID_LENGTH + 1)));
    }

    #[test]
    fn content_size_is_bounded() {
        ensure_content_size("short").expect("small content");
        let oversized = "x".repeat(MAX_EVENT_CONTENT_BYTES + 1);
        assert!(matches!(
            ensure_content_size(&oversized),
            Err(RequestError::Validation(_))
        ));
    }
}
