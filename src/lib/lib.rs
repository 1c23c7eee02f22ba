//! Typed request workflows: a registry of request kinds with their statuses,
//! actions and payload schemas, request timelines with per-event-type
//! permissions, and the REST surface over both.

pub mod actions;
pub mod config;
pub mod error;
pub mod event;
pub mod index;
pub mod observability;
pub mod permissions;
pub mod registry;
pub mod request;
pub mod request_type;
pub mod schema;
pub mod server;
pub mod service;
pub mod snowflake;
pub mod store;
pub mod token;
pub mod uow;
pub mod validation;

pub use error::{RequestError, Result};
pub use event::{RequestEvent, RequestEventType};
pub use permissions::Identity;
pub use registry::RequestTypeRegistry;
pub use request::Request;
pub use request_type::RequestType;
