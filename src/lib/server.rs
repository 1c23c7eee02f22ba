use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::{
    config::Config,
    error::{RequestError, Result},
    index::MemoryIndex,
    observability,
    permissions::{GrantPolicy, Identity},
    registry::RequestTypeRegistry,
    schema::{MISSING_REQUIRED, ValidationErrors},
    service::{
        EventSearchParams, EventsService, RequestSearchParams, RequestsService, ServiceContext,
    },
    store::RecordStore,
    token::TokenManager,
    validation::is_valid_record_id,
};

#[derive(Clone)]
pub struct AppState {
    requests: RequestsService,
    events: EventsService,
    tokens: Arc<TokenManager>,
}

impl AppState {
    pub fn new(context: &ServiceContext, tokens: Arc<TokenManager>) -> Self {
        let (requests, events) = context.services();
        Self {
            requests,
            events,
            tokens,
        }
    }

    /// Open the store under `config.data_dir`, register the built-in request
    /// types and rebuild the search index.
    pub fn open(config: &Config) -> Result<Self> {
        config.ensure_data_dir()?;
        let tokens = Arc::new(TokenManager::new(config.token_manager_config()?)?);
        let store = Arc::new(RecordStore::open(
            config.store_path(),
            config.snowflake_worker_id,
        )?);
        let context = ServiceContext::new(
            store,
            Arc::new(MemoryIndex::new()),
            Arc::new(RequestTypeRegistry::with_defaults()?),
            Arc::new(GrantPolicy),
            config.service_settings(),
        );
        context.rebuild_index()?;
        Ok(Self::new(&context, tokens))
    }

    fn identity(&self, headers: &HeaderMap) -> Result<Identity> {
        let token = extract_bearer_token(headers)?;
        self.tokens.identity(token.as_deref())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(observability::metrics_handler))
        .route("/requests", get(search_requests).post(create_request))
        .route(
            "/requests/{id}",
            get(read_request).put(update_request).delete(delete_request),
        )
        .route(
            "/requests/{id}/actions/{action}",
            post(execute_action),
        )
        .route(
            "/requests/{id}/timeline",
            get(search_events).post(create_event),
        )
        .route(
            "/requests/{id}/timeline/{event_id}",
            get(read_event).put(update_event).delete(delete_event),
        )
        .route_layer(middleware::from_fn(observability::track_http_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(config: Config) -> Result<()> {
    if let Err(err) = observability::init() {
        warn!("metrics recorder unavailable: {err}");
    }
    let state = AppState::open(&config)?;
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting reqflow server on {addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| RequestError::Storage(err.to_string()))?;
    info!("reqflow server stopped");
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
}

async fn search_requests(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<RequestSearchParams>,
) -> Result<Response> {
    let identity = state.identity(&headers)?;
    let list = blocking(move || state.requests.search(&identity, &params)).await?;
    Ok(Json(list).into_response())
}

async fn create_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Response> {
    let Json(body) = body?;
    let identity = state.identity(&headers)?;
    let type_id = body
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RequestError::from(ValidationErrors::single("type", MISSING_REQUIRED)))?;
    let item = blocking(move || state.requests.create(&identity, &type_id, &body)).await?;
    Ok(with_etag(StatusCode::CREATED, item.revision_id(), item))
}

async fn read_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response> {
    ensure_record_id(&id, RequestError::RequestNotFound)?;
    let identity = state.identity(&headers)?;
    let item = blocking(move || state.requests.read(&identity, &id)).await?;
    Ok(with_etag(StatusCode::OK, item.revision_id(), item))
}

async fn update_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Response> {
    let Json(body) = body?;
    ensure_record_id(&id, RequestError::RequestNotFound)?;
    let identity = state.identity(&headers)?;
    let revision = if_match(&headers)?.or(body_revision(&body)?);
    let item = blocking(move || state.requests.update(&identity, &id, &body, revision)).await?;
    Ok(with_etag(StatusCode::OK, item.revision_id(), item))
}

async fn delete_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    ensure_record_id(&id, RequestError::RequestNotFound)?;
    let identity = state.identity(&headers)?;
    let revision = if_match(&headers)?;
    blocking(move || state.requests.delete(&identity, &id, revision)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn execute_action(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, action)): Path<(String, String)>,
) -> Result<Response> {
    ensure_record_id(&id, RequestError::RequestNotFound)?;
    let identity = state.identity(&headers)?;
    let item = blocking(move || state.requests.execute_action(&identity, &id, &action)).await?;
    Ok(with_etag(StatusCode::OK, item.revision_id(), item))
}

async fn search_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<EventSearchParams>,
) -> Result<Response> {
    ensure_record_id(&id, RequestError::RequestNotFound)?;
    let identity = state.identity(&headers)?;
    let list = blocking(move || state.events.search(&identity, Some(&id), &params)).await?;
    Ok(Json(list).into_response())
}

async fn create_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Response> {
    let Json(body) = body?;
    ensure_record_id(&id, RequestError::RequestNotFound)?;
    let identity = state.identity(&headers)?;
    let item = blocking(move || state.events.create(&identity, &id, &body)).await?;
    Ok(with_etag(StatusCode::CREATED, item.revision_id(), item))
}

async fn read_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, event_id)): Path<(String, String)>,
) -> Result<Response> {
    ensure_record_id(&event_id, RequestError::EventNotFound)?;
    let identity = state.identity(&headers)?;
    let item = blocking(move || {
        state.events.ensure_in_request(&id, &event_id)?;
        state.events.read(&identity, &event_id)
    })
    .await?;
    Ok(with_etag(StatusCode::OK, item.revision_id(), item))
}

async fn update_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, event_id)): Path<(String, String)>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Response> {
    let Json(body) = body?;
    ensure_record_id(&event_id, RequestError::EventNotFound)?;
    let identity = state.identity(&headers)?;
    let revision = if_match(&headers)?.or(body_revision(&body)?);
    let item = blocking(move || {
        state.events.ensure_in_request(&id, &event_id)?;
        state.events.update(&identity, &event_id, &body, revision)
    })
    .await?;
    Ok(with_etag(StatusCode::OK, item.revision_id(), item))
}

async fn delete_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, event_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    ensure_record_id(&event_id, RequestError::EventNotFound)?;
    let identity = state.identity(&headers)?;
    let revision = if_match(&headers)?;
    blocking(move || {
        state.events.ensure_in_request(&id, &event_id)?;
        state.events.delete(&identity, &event_id, revision)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Store and index access is synchronous; keep it off the async workers.
async fn blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| RequestError::Storage(format!("blocking task failed: {err}")))?
}

fn with_etag<T: Serialize>(status: StatusCode, revision_id: u64, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(&format!("\"{revision_id}\"")) {
        response.headers_mut().insert(header::ETAG, value);
    }
    response
}

fn ensure_record_id(id: &str, missing: RequestError) -> Result<()> {
    if is_valid_record_id(id) {
        Ok(())
    } else {
        Err(missing)
    }
}

/// Revision from an `If-Match` header carrying a previously returned ETag.
fn if_match(headers: &HeaderMap) -> Result<Option<u64>> {
    let Some(value) = headers.get(header::IF_MATCH) else {
        return Ok(None);
    };
    let invalid = || RequestError::from(ValidationErrors::single("If-Match", "Not a valid revision."));
    let raw = value.to_str().map_err(|_| invalid())?.trim();
    if raw == "*" {
        return Ok(None);
    }
    raw.trim_start_matches("W/")
        .trim_matches('"')
        .parse::<u64>()
        .map(Some)
        .map_err(|_| invalid())
}

/// Revision echoed back in an update body. `If-Match` takes precedence.
fn body_revision(body: &Value) -> Result<Option<u64>> {
    match body.get("revision_id") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            ValidationErrors::single("revision_id", "Not a valid revision.").into()
        }),
    }
}

/// A present but malformed `Authorization` header is an error; an absent one
/// means anonymous.
pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Result<Option<String>> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| RequestError::InvalidToken)?;
    match value.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(Some(token.trim().to_string())),
        _ => Err(RequestError::InvalidToken),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn if_match_accepts_quoted_and_weak_etags() {
        let mut headers = HeaderMap::new();
        assert_eq!(if_match(&headers).unwrap(), None);

        headers.insert(header::IF_MATCH, HeaderValue::from_static("\"4\""));
        assert_eq!(if_match(&headers).unwrap(), Some(4));

        headers.insert(header::IF_MATCH, HeaderValue::from_static("W/\"7\""));
        assert_eq!(if_match(&headers).unwrap(), Some(7));

        headers.insert(header::IF_MATCH, HeaderValue::from_static("abc"));
        assert!(matches!(if_match(&headers), Err(RequestError::Validation(_))));
    }

    #[test]
    fn body_revision_is_optional_but_must_be_numeric() {
        assert_eq!(body_revision(&serde_json::json!({"title": "x"})).unwrap(), None);
        assert_eq!(body_revision(&serde_json::json!({"revision_id": null})).unwrap(), None);
        assert_eq!(body_revision(&serde_json::json!({"revision_id": 3})).unwrap(), Some(3));
        assert!(matches!(
            body_revision(&serde_json::json!({"revision_id": "3"})),
            Err(RequestError::Validation(_))
        ));
    }

    #[test]
    fn bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer_token(&headers).unwrap().is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(extract_bearer_token(&headers).unwrap().as_deref(), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(matches!(
            extract_bearer_token(&headers),
            Err(RequestError::InvalidToken)
        ));
    }
}
