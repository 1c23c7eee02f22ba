use std::{sync::Arc, time::Instant};

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use super::{
    ServiceContext, SortOption, check_revision,
    record_service_op,
    results::{RequestItem, ResultList, request_document},
};
use crate::{
    error::{RequestError, Result},
    event::RequestEvent,
    index::SearchQuery,
    permissions::{self, Identity, PermissionContext, action_permission, require_permission},
    request::Request,
    request_type::{INITIAL_STATUS, RequestType},
    store::Record,
    uow::UnitOfWork,
};

const SERVICE: &str = "requests";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestSearchParams {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub sort: Option<SortOption>,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub size: Option<usize>,
    #[serde(default, rename = "type")]
    pub type_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub is_open: Option<bool>,
    /// User id of the creator.
    #[serde(default)]
    pub created_by: Option<String>,
    /// User id of the receiver.
    #[serde(default)]
    pub receiver: Option<String>,
}

#[derive(Clone)]
pub struct RequestsService {
    ctx: ServiceContext,
}

impl RequestsService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub fn create(&self, identity: &Identity, type_id: &str, data: &Value) -> Result<RequestItem> {
        let start = Instant::now();
        let result = self.create_inner(identity, type_id, data);
        record_service_op(SERVICE, "create", &result, start);
        result
    }

    fn create_inner(&self, identity: &Identity, type_id: &str, data: &Value) -> Result<RequestItem> {
        let kind = self.ctx.registry().resolve(type_id)?;
        require_permission(
            self.ctx.policy(),
            identity,
            permissions::CREATE,
            PermissionContext::none(),
        )?;
        let loaded = kind.schema().load(data)?;

        let store = self.ctx.store();
        let mut request = Request::new(store.next_id(), kind.type_id(), INITIAL_STATUS);
        request.created_by = identity.reference();
        request.apply(&loaded);
        let mut context = Map::new();
        context.insert("identity".to_string(), json!(identity.id));
        request.external_id = kind.generate_external_id(&request, &context);

        let mut uow = UnitOfWork::begin(store, self.ctx.index());
        uow.create(&mut request)?;
        uow.reindex(
            &request,
            request_document(&request, &kind)?,
            self.ctx.refresh(false),
        );
        uow.complete()?;

        info!(id = %request.id, type_id = kind.type_id(), "created request");
        RequestItem::new(request, &kind, identity)
    }

    pub fn read(&self, identity: &Identity, id: &str) -> Result<RequestItem> {
        let start = Instant::now();
        let result = (|| {
            let (request, kind) = self.load(id)?;
            require_permission(
                self.ctx.policy(),
                identity,
                permissions::READ,
                PermissionContext::request(&request),
            )?;
            RequestItem::new(request, &kind, identity)
        })();
        record_service_op(SERVICE, "read", &result, start);
        result
    }

    pub fn update(
        &self,
        identity: &Identity,
        id: &str,
        data: &Value,
        revision_id: Option<u64>,
    ) -> Result<RequestItem> {
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
    ) -> Result<RequestItem> {
        let mut uow = UnitOfWork::begin(self.ctx.store(), self.ctx.index());
        let (mut request, kind) = self.load(id)?;
        check_revision(&request, revision_id)?;
        require_permission(
            self.ctx.policy(),
            identity,
            permissions::UPDATE,
            PermissionContext::request(&request),
        )?;
        let loaded = kind.schema().load(data)?;

        request.apply(&loaded);
        request.updated_at = Utc::now();
        uow.commit(&mut request)?;
        uow.reindex(
            &request,
            request_document(&request, &kind)?,
            self.ctx.refresh(false),
        );
        uow.complete()?;

        debug!(id = %request.id, revision = request.revision_id, "updated request");
        RequestItem::new(request, &kind, identity)
    }

    /// Remove a request and its whole timeline.
    pub fn delete(&self, identity: &Identity, id: &str, revision_id: Option<u64>) -> Result<bool> {
        let start = Instant::now();
        let result = self.delete_inner(identity, id, revision_id);
        record_service_op(SERVICE, "delete", &result, start);
        result
    }

    fn delete_inner(&self, identity: &Identity, id: &str, revision_id: Option<u64>) -> Result<bool> {
        let store = self.ctx.store();
        let mut uow = UnitOfWork::begin(store, self.ctx.index());
        let (request, _) = self.load(id)?;
        check_revision(&request, revision_id)?;
        require_permission(
            self.ctx.policy(),
            identity,
            permissions::DELETE,
            PermissionContext::request(&request),
        )?;

        let event_ids = store.child_ids::<RequestEvent>(request.id())?;
        for event_id in &event_ids {
            if let Some(event) = store.get_by_id::<RequestEvent>(event_id, false)? {
                uow.delete(&event, true)?;
                uow.unindex(&event, true);
            }
        }
        uow.delete(&request, true)?;
        uow.unindex(&request, true);
        uow.complete()?;

        info!(id = %request.id, events = event_ids.len(), "deleted request");
        Ok(true)
    }

    pub fn search(
        &self,
        identity: &Identity,
        params: &RequestSearchParams,
    ) -> Result<ResultList<RequestItem>> {
        let start = Instant::now();
        let result = self.search_inner(identity, params);
        record_service_op(SERVICE, "search", &result, start);
        result
    }

    fn search_inner(
        &self,
        identity: &Identity,
        params: &RequestSearchParams,
    ) -> Result<ResultList<RequestItem>> {
        require_permission(
            self.ctx.policy(),
            identity,
            permissions::SEARCH,
            PermissionContext::none(),
        )?;
        let (page, size) = self.ctx.paging(params.page, params.size)?;
        let sort = params.sort.unwrap_or(SortOption::Newest);
        let (sort_field, descending) = sort.field();

        let mut query = SearchQuery::new()
            .text(params.q.as_deref())
            .sort(sort_field, descending)
            .page(page, size);
        if let Some(type_id) = &params.type_id {
            query = query.filter("type", type_id.as_str());
        }
        if let Some(status) = &params.status {
            query = query.filter("status", status.as_str());
        }
        if let Some(is_open) = params.is_open {
            query = query.filter("is_open", is_open);
        }
        if let Some(user) = &params.created_by {
            query = query.filter("created_by.user", user.as_str());
        }
        if let Some(user) = &params.receiver {
            query = query.filter("receiver.user", user.as_str());
        }

        let found = self.ctx.index().search(Request::KIND, &query);
        let mut items = Vec::with_capacity(found.hits.len());
        for hit in found.hits {
            let request: Request = serde_json::from_value(hit)?;
            let kind = self.ctx.registry().resolve(&request.type_id)?;
            items.push(RequestItem::new(request, &kind, identity)?);
        }
        Ok(ResultList::new(
            items,
            found.total,
            sort.as_str(),
            "/requests",
            page,
            size,
        ))
    }

    /// Run a named action of the request's type. A resulting system event is
    /// written in the same unit of work as the status change.
    pub fn execute_action(&self, identity: &Identity, id: &str, action: &str) -> Result<RequestItem> {
        let start = Instant::now();
        let result = self.execute_action_inner(identity, id, action);
        record_service_op(SERVICE, "execute_action", &result, start);
        result
    }

    fn execute_action_inner(
        &self,
        identity: &Identity,
        id: &str,
        action: &str,
    ) -> Result<RequestItem> {
        let store = self.ctx.store();
        let mut uow = UnitOfWork::begin(store, self.ctx.index());
        let (request, kind) = self.load(id)?;
        require_permission(
            self.ctx.policy(),
            identity,
            &action_permission(action),
            PermissionContext::request(&request),
        )?;

        let mut handler = kind.resolve_action(action, request)?;
        if !handler.can_execute(identity) {
            return Err(RequestError::ActionNotAllowed {
                action: action.to_string(),
                status: handler.request().status.clone(),
            });
        }
        let outcome = handler.execute(identity)?;
        let mut request = handler.into_request();
        kind.ensure_status(&request.status)?;

        uow.commit(&mut request)?;
        uow.reindex(
            &request,
            request_document(&request, &kind)?,
            self.ctx.refresh(false),
        );
        if let Some(event_type) = outcome.event {
            let mut event = RequestEvent::new(store.next_id(), request.id.clone(), event_type);
            event.created_by = identity.reference();
            uow.create(&mut event)?;
            uow.reindex(&event, serde_json::to_value(&event)?, self.ctx.refresh(false));
        }
        uow.complete()?;

        info!(id = %request.id, action, status = %request.status, "executed request action");
        RequestItem::new(request, &kind, identity)
    }

    fn load(&self, id: &str) -> Result<(Request, Arc<RequestType>)> {
        let request = self
            .ctx
            .store()
            .get_by_id::<Request>(id, false)?
            .ok_or(RequestError::RequestNotFound)?;
        let kind = self.ctx.registry().resolve(&request.type_id)?;
        Ok((request, kind))
    }
}
