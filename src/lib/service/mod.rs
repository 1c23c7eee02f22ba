//! Request and timeline services.
//!
//! Every mutating operation checks permissions first, then validates, then
//! writes through a single [`UnitOfWork`](crate::uow::UnitOfWork).

mod events;
mod requests;
mod results;

use std::{sync::Arc, time::Instant};

use metrics::{counter, histogram};
use serde::Deserialize;
use tracing::{info, warn};

pub use events::{EventSearchParams, EventsService};
pub use requests::{RequestSearchParams, RequestsService};
pub use results::{EventItem, HitList, Links, RequestItem, ResultList};

use crate::{
    error::{RequestError, Result},
    event::RequestEvent,
    index::SearchIndex,
    permissions::PermissionPolicy,
    registry::RequestTypeRegistry,
    request::Request,
    schema::ValidationErrors,
    store::{Record, RecordStore},
};

#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub page_size: usize,
    pub page_limit: usize,
    /// Make every index write visible immediately.
    pub refresh_on_write: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            page_size: 25,
            page_limit: 100,
            refresh_on_write: true,
        }
    }
}

/// Collaborators shared by the request and event services.
#[derive(Clone)]
pub struct ServiceContext {
    store: Arc<RecordStore>,
    index: Arc<dyn SearchIndex>,
    registry: Arc<RequestTypeRegistry>,
    policy: Arc<dyn PermissionPolicy>,
    settings: ServiceSettings,
}

impl ServiceContext {
    pub fn new(
        store: Arc<RecordStore>,
        index: Arc<dyn SearchIndex>,
        registry: Arc<RequestTypeRegistry>,
        policy: Arc<dyn PermissionPolicy>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            index,
            registry,
            policy,
            settings,
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn index(&self) -> &dyn SearchIndex {
        self.index.as_ref()
    }

    pub fn registry(&self) -> &RequestTypeRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &dyn PermissionPolicy {
        self.policy.as_ref()
    }

    pub fn settings(&self) -> ServiceSettings {
        self.settings
    }

    /// Both services over this context.
    pub fn services(&self) -> (RequestsService, EventsService) {
        (
            RequestsService::new(self.clone()),
            EventsService::new(self.clone()),
        )
    }

    /// Index every stored request and event. Requests whose type is no longer
    /// registered are skipped.
    pub fn rebuild_index(&self) -> Result<usize> {
        let mut indexed = 0;
        for request in self.store.list::<Request>()? {
            let kind = match self.registry.resolve(&request.type_id) {
                Ok(kind) => kind,
                Err(err) => {
                    warn!(id = %request.id, "skipping request during reindex: {err}");
                    continue;
                }
            };
            let document = results::request_document(&request, &kind)?;
            self.index.index(Request::KIND, request.id(), document, false);
            indexed += 1;
        }
        for event in self.store.list::<RequestEvent>()? {
            self.index
                .index(RequestEvent::KIND, event.id(), serde_json::to_value(&event)?, false);
            indexed += 1;
        }
        self.index.refresh();
        info!(records = indexed, "rebuilt search index");
        Ok(indexed)
    }

    fn refresh(&self, forced: bool) -> bool {
        forced || self.settings.refresh_on_write
    }

    fn paging(&self, page: Option<usize>, size: Option<usize>) -> Result<(usize, usize)> {
        let page = page.unwrap_or(1);
        let size = size.unwrap_or(self.settings.page_size);
        let mut errors = ValidationErrors::new();
        if page == 0 {
            errors.add("page", "Must be greater than or equal to 1.");
        }
        if size == 0 || size > self.settings.page_limit {
            errors.add(
                "size",
                format!(
                    "Must be greater than or equal to 1 and less than or equal to {}.",
                    self.settings.page_limit
                ),
            );
        }
        if errors.is_empty() {
            Ok((page, size))
        } else {
            Err(errors.into())
        }
    }
}

/// Named sort orders accepted by search endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOption {
    Newest,
    Oldest,
    Updated,
}

impl SortOption {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::Oldest => "oldest",
            Self::Updated => "updated",
        }
    }

    fn field(self) -> (&'static str, bool) {
        match self {
            Self::Newest => ("created_at", true),
            Self::Oldest => ("created_at", false),
            Self::Updated => ("updated_at", true),
        }
    }
}

/// Optimistic concurrency check against a caller-supplied revision.
fn check_revision<T: Record>(record: &T, expected: Option<u64>) -> Result<()> {
    match expected {
        Some(expected) if expected != record.revision_id() => Err(RequestError::RevisionConflict {
            expected,
            actual: record.revision_id(),
        }),
        _ => Ok(()),
    }
}

fn record_service_op<T>(service: &'static str, operation: &'static str, result: &Result<T>, start: Instant) {
    let status = if result.is_ok() { "ok" } else { "err" };
    let labels = [
        ("service", service),
        ("operation", operation),
        ("status", status),
    ];
    counter!("reqflow_service_operations_total", &labels).increment(1);
    histogram!("reqflow_service_operation_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}
