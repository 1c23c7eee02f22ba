use std::io;

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::schema::ValidationErrors;

pub type Result<T> = std::result::Result<T, RequestError>;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("token not found or inactive")]
    InvalidToken,
    #[error("token has expired")]
    TokenExpired,
    #[error("unauthorized")]
    Unauthorized,
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("request type '{0}' is not registered")]
    UnknownType(String),
    #[error("request type '{0}' is already registered")]
    DuplicateType(String),
    #[error("status '{status}' is not declared for request type '{type_id}'")]
    InvalidStatus { type_id: String, status: String },
    #[error("action '{action}' is not available for request type '{type_id}'")]
    UnknownAction { type_id: String, action: String },
    #[error("action '{action}' cannot be executed while the request is '{status}'")]
    ActionNotAllowed { action: String, status: String },
    #[error("request not found")]
    RequestNotFound,
    #[error("event not found")]
    EventNotFound,
    #[error("revision mismatch: expected {expected}, found {actual}")]
    RevisionConflict { expected: u64, actual: u64 },
    #[error("validation error")]
    Validation(ValidationErrors),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl RequestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) => StatusCode::BAD_REQUEST,
            Self::InvalidToken | Self::TokenExpired | Self::Unauthorized => {
                StatusCode::UNAUTHORIZED
            }
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::UnknownType(_)
            | Self::InvalidStatus { .. }
            | Self::ActionNotAllowed { .. }
            | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::DuplicateType(_) | Self::RevisionConflict { .. } => StatusCode::CONFLICT,
            Self::UnknownAction { .. } | Self::RequestNotFound | Self::EventNotFound => {
                StatusCode::NOT_FOUND
            }
            Self::Storage(_) | Self::Serialization(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ValidationErrors> for RequestError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

/// Unreadable request bodies are reported like any other invalid input.
impl From<JsonRejection> for RequestError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(ValidationErrors::single("_schema", rejection.body_text()))
    }
}

impl From<toml::de::Error> for RequestError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for RequestError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for RequestError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rocksdb::Error> for RequestError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    status: u16,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<&'a ValidationErrors>,
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();
        let errors = match &self {
            Self::Validation(errors) => Some(errors),
            _ => None,
        };
        let body = ErrorBody {
            status: status.as_u16(),
            message: &message,
            errors,
        };
        (status, Json(body)).into_response()
    }
}
