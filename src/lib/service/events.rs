use std::time::Instant;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::{
    ServiceContext, SortOption, check_revision, record_service_op,
    results::{EventItem, ResultList},
};
use crate::{
    error::{RequestError, Result},
    event::{RequestEvent, RequestEventType},
    index::SearchQuery,
    permissions::{
        self, EventAction, Identity, PermissionContext, event_permission, require_permission,
    },
    request::Request,
    schema::{Field, MISSING_REQUIRED, Schema, UnknownPolicy, ValidationErrors},
    store::Record,
    uow::UnitOfWork,
    validation::ensure_content_size,
};

const SERVICE: &str = "events";

pub const CONTENT_FORMATS: [&str; 2] = ["html", "text"];

/// Shape of timeline entry input.
pub fn event_schema() -> Schema {
    Schema::new(UnknownPolicy::Exclude)
        .field("id", Field::string().dump_only())
        .field("request_id", Field::string().dump_only())
        .field("type", Field::string().required().length(Some(1), Some(64)))
        .field("content", Field::string())
        .field("format", Field::string().one_of(CONTENT_FORMATS))
        .field("created_by", Field::reference().dump_only())
        .field("created_at", Field::datetime().dump_only())
        .field("updated_at", Field::datetime().dump_only())
        .field("revision_id", Field::integer().dump_only())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventSearchParams {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub sort: Option<SortOption>,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub size: Option<usize>,
}

/// Validated event input.
struct EventInput {
    event_type: RequestEventType,
    content: String,
    format: Option<String>,
}

#[derive(Clone)]
pub struct EventsService {
    ctx: ServiceContext,
}

impl EventsService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub fn create(&self, identity: &Identity, request_id: &str, data: &Value) -> Result<EventItem> {
        let start = Instant::now();
        let result = self.create_inner(identity, request_id, data);
        record_service_op(SERVICE, "create", &result, start);
        result
    }

    fn create_inner(&self, identity: &Identity, request_id: &str, data: &Value) -> Result<EventItem> {
        let store = self.ctx.store();
        // Hold the writer lock from the parent lookup on, so the request
        // cannot be deleted before the event lands.
        let mut uow = UnitOfWork::begin(store, self.ctx.index());
        let request = self.load_request(request_id)?;
        let event_type = declared_type(data)?;
        require_permission(
            self.ctx.policy(),
            identity,
            &event_permission(EventAction::Create, &event_type),
            PermissionContext::request(&request),
        )?;
        let input = load_input(data)?;

        let mut event = RequestEvent::new(store.next_id(), request.id.clone(), input.event_type);
        event.content = input.content;
        if let Some(format) = input.format {
            event.format = format;
        }
        event.created_by = identity.reference();

        uow.create(&mut event)?;
        uow.reindex(&event, serde_json::to_value(&event)?, self.ctx.refresh(false));
        uow.complete()?;

        info!(id = %event.id, request_id = %event.request_id, event_type = %event.event_type, "created event");
        Ok(EventItem::new(event))
    }

    pub fn read(&self, identity: &Identity, id: &str) -> Result<EventItem> {
        let start = Instant::now();
        let result = (|| {
            let event = self.load_event(id)?;
            let request = self.load_request(&event.request_id)?;
            require_permission(
                self.ctx.policy(),
                identity,
                permissions::READ_EVENT,
                PermissionContext::event(&request, &event),
            )?;
            Ok(EventItem::new(event))
        })();
        record_service_op(SERVICE, "read", &result, start);
        result
    }

    /// Replace the content and type of an event in place.
    pub fn update(
        &self,
        identity: &Identity,
        id: &str,
        data: &Value,
        revision_id: Option<u64>,
    ) -> Result<EventItem> {
        let start = Instant::now();
        let result = self.update_inner(identity, id, data, revision_id);
        record_service_op(SERVICE, "update", &result, start);
        result
    }

    fn update_inner(
        &self,
        identity: &Identity,
        id: &str,
        data: &Value,
        revision_id: Option<u64>,
    ) -> Result<EventItem> {
        let mut uow = UnitOfWork::begin(self.ctx.store(), self.ctx.index());
        let mut event = self.load_event(id)?;
        check_revision(&event, revision_id)?;
        let event_type = declared_type(data)?;
        let request = self.load_request(&event.request_id)?;
        require_permission(
            self.ctx.policy(),
            identity,
            &event_permission(EventAction::Update, &event_type),
            PermissionContext::event(&request, &event),
        )?;
        let input = load_input(data)?;
        if event.event_type == RequestEventType::Removed {
            return Err(ValidationErrors::single("type", "Removed events cannot be edited.").into());
        }

        event.event_type = input.event_type;
        event.content = input.content;
        if let Some(format) = input.format {
            event.format = format;
        }
        event.updated_at = Utc::now();
        uow.commit(&mut event)?;
        uow.reindex(&event, serde_json::to_value(&event)?, self.ctx.refresh(false));
        uow.complete()?;

        debug!(id = %event.id, revision = event.revision_id, "updated event");
        Ok(EventItem::new(event))
    }

    /// Comments are redacted in place and stay in the timeline as `removed`;
    /// every other event type is removed outright. Returns `true` either way.
    pub fn delete(&self, identity: &Identity, id: &str, revision_id: Option<u64>) -> Result<bool> {
        let start = Instant::now();
        let result = self.delete_inner(identity, id, revision_id);
        record_service_op(SERVICE, "delete", &result, start);
        result
    }

    fn delete_inner(&self, identity: &Identity, id: &str, revision_id: Option<u64>) -> Result<bool> {
        let mut uow = UnitOfWork::begin(self.ctx.store(), self.ctx.index());
        let mut event = self.load_event(id)?;
        check_revision(&event, revision_id)?;
        let request = self.load_request(&event.request_id)?;
        require_permission(
            self.ctx.policy(),
            identity,
            &event_permission(EventAction::Delete, &event.event_type),
            PermissionContext::event(&request, &event),
        )?;

        if event.event_type.is_comment() {
            event.redact();
            uow.commit(&mut event)?;
            uow.reindex(&event, serde_json::to_value(&event)?, true);
            uow.complete()?;
            info!(id = %event.id, "redacted comment");
        } else {
            uow.delete(&event, true)?;
            uow.unindex(&event, true);
            uow.complete()?;
            info!(id = %event.id, event_type = %event.event_type, "deleted event");
        }
        Ok(true)
    }

    /// Events visible to the caller, optionally limited to one request.
    /// Without `read_event` the listing is empty rather than an error.
    pub fn search(
        &self,
        identity: &Identity,
        request_id: Option<&str>,
        params: &EventSearchParams,
    ) -> Result<ResultList<EventItem>> {
        let start = Instant::now();
        let result = self.search_inner(identity, request_id, params);
        record_service_op(SERVICE, "search", &result, start);
        result
    }

    fn search_inner(
        &self,
        identity: &Identity,
        request_id: Option<&str>,
        params: &EventSearchParams,
    ) -> Result<ResultList<EventItem>> {
        let request = request_id.map(|id| self.load_request(id)).transpose()?;
        let context = PermissionContext {
            request: request.as_ref(),
            event: None,
        };
        require_permission(self.ctx.policy(), identity, permissions::SEARCH, context)?;

        let (page, size) = self.ctx.paging(params.page, params.size)?;
        let sort = params.sort.unwrap_or(SortOption::Oldest);
        let base = match request_id {
            Some(id) => format!("/requests/{id}/timeline"),
            None => "/events".to_string(),
        };
        if !self
            .ctx
            .policy()
            .check(identity, permissions::READ_EVENT, context)
        {
            return Ok(ResultList::empty(sort.as_str(), &base, size));
        }

        let (sort_field, descending) = sort.field();
        let mut query = SearchQuery::new()
            .text(params.q.as_deref())
            .sort(sort_field, descending)
            .page(page, size);
        if let Some(id) = request_id {
            query = query.filter("request_id", id);
        }

        let found = self.ctx.index().search(RequestEvent::KIND, &query);
        let items = found
            .hits
            .into_iter()
            .map(|hit| serde_json::from_value(hit).map(EventItem::new))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ResultList::new(
            items,
            found.total,
            sort.as_str(),
            &base,
            page,
            size,
        ))
    }

    /// Event `id` if it belongs to `request_id`.
    pub fn ensure_in_request(&self, request_id: &str, id: &str) -> Result<()> {
        match self.ctx.store().get_by_id::<RequestEvent>(id, false)? {
            Some(event) if event.request_id == request_id => Ok(()),
            _ => Err(RequestError::EventNotFound),
        }
    }

    fn load_event(&self, id: &str) -> Result<RequestEvent> {
        self.ctx
            .store()
            .get_by_id::<RequestEvent>(id, false)?
            .ok_or(RequestError::EventNotFound)
    }

    fn load_request(&self, id: &str) -> Result<Request> {
        self.ctx
            .store()
            .get_by_id::<Request>(id, false)?
            .ok_or(RequestError::RequestNotFound)
    }
}

/// The event type named by the input, needed before validation to pick the
/// permission.
fn declared_type(data: &Value) -> Result<RequestEventType> {
    match data.get("type").and_then(Value::as_str) {
        Some(tag) if !tag.trim().is_empty() => Ok(RequestEventType::from(tag)),
        _ => Err(ValidationErrors::single("type", MISSING_REQUIRED).into()),
    }
}

fn load_input(data: &Value) -> Result<EventInput> {
    let loaded = event_schema().load(data)?;
    let event_type = declared_type(data)?;
    if event_type == RequestEventType::Removed {
        return Err(ValidationErrors::single("type", "Reserved event type.").into());
    }
    let content = loaded
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if event_type.is_comment() && content.trim().is_empty() {
        return Err(ValidationErrors::single("content", MISSING_REQUIRED).into());
    }
    ensure_content_size(&content)?;
    let format = loaded
        .get("format")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(EventInput {
        event_type,
        content,
        format,
    })
}
