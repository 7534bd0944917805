//! Route handlers and error mapping

use crate::auth::AuthError;
use crate::bus::{BusMessage, SubscriberGuard};
use crate::resources::{ResourceError, ResourceName};
use crate::server::AppState;
use crate::storage::{JsonMap, Patch, StorageError};

use axum::extract::{Form, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{extract::FromRequestParts, Json, Router};
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

/// Errors surfaced to HTTP callers
#[derive(Debug)]
pub enum ApiError {
    BadInput(String),
    NotFound,
    Unauthenticated(String),
    Conflict(String),
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            ApiError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            ),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        // Fatal for this request, not retried
        error!(error = %err, "storage failure");
        ApiError::Internal
    }
}

impl From<ResourceError> for ApiError {
    fn from(err: ResourceError) -> Self {
        ApiError::BadInput(err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidToken | AuthError::InvalidCredentials => {
                ApiError::Unauthenticated(err.to_string())
            }
            AuthError::UserExists(_) => ApiError::Conflict(err.to_string()),
            AuthError::Storage(e) => e.into(),
            AuthError::Signing(e) => {
                error!(error = %e, "token signing failure");
                ApiError::Internal
            }
        }
    }
}

/// The verified bearer identity on a resource request
pub struct AuthedUser {
    pub user: String,
}

impl FromRequestParts<AppState> for AuthedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or_else(|| ApiError::Unauthenticated("auth token is missing".to_string()))?;

        let claims = state.gate.verify(token)?;
        Ok(AuthedUser { user: claims.sub })
    }
}

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/auth/create", post(register_handler))
        .route("/auth/validate", post(validate_handler))
        .route("/api/{resource}", get(list_handler).post(create_handler))
        .route(
            "/api/{resource}/{id}",
            get(get_handler).patch(patch_handler).delete(delete_handler),
        )
        .route("/updates", get(updates_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct CredentialForm {
    user: String,
    auth: String,
}

async fn register_handler(
    State(state): State<AppState>,
    Form(form): Form<CredentialForm>,
) -> Result<Json<Value>, ApiError> {
    state.gate.register(&form.user, &form.auth)?;
    Ok(Json(json!({ "status": true })))
}

async fn validate_handler(
    State(state): State<AppState>,
    Form(form): Form<CredentialForm>,
) -> Result<Json<Value>, ApiError> {
    let token = state.gate.validate(&form.user, &form.auth)?;
    Ok(Json(json!({ "authToken": token })))
}

#[derive(Deserialize)]
struct ListQuery {
    q: Option<String>,
}

/// Resolve and register the resource for an authorized request
fn resolve(state: &AppState, user: &AuthedUser, raw: &str) -> Result<ResourceName, ApiError> {
    let resource = ResourceName::parse(raw)?;
    info!(user = %user.user, resource = %resource, "resource access");
    state.registry.ensure(&resource)?;
    Ok(resource)
}

/// Require a JSON object, the only valid document body shape
fn into_object(value: Value) -> Result<JsonMap, ApiError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ApiError::BadInput("body must be a JSON object".to_string())),
    }
}

async fn list_handler(
    State(state): State<AppState>,
    user: AuthedUser,
    Path(resource): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let resource = resolve(&state, &user, &resource)?;

    let filters = match query.q.as_deref() {
        None | Some("") => JsonMap::new(),
        Some(raw) => serde_json::from_str::<Value>(raw)
            .map_err(|e| ApiError::BadInput(format!("malformed filter: {e}")))
            .and_then(into_object)?,
    };

    let docs = state.store.list(&resource, &filters)?;
    let out: Vec<Value> = docs.into_iter().map(|d| d.into_value()).collect();
    Ok(Json(Value::Array(out)))
}

async fn get_handler(
    State(state): State<AppState>,
    user: AuthedUser,
    Path((resource, id)): Path<(String, i64)>,
) -> Result<Json<Value>, ApiError> {
    let resource = resolve(&state, &user, &resource)?;

    match state.store.get(&resource, id)? {
        Some(doc) => Ok(Json(doc.into_value())),
        None => Err(ApiError::NotFound),
    }
}

async fn create_handler(
    State(state): State<AppState>,
    user: AuthedUser,
    Path(resource): Path<String>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let resource = resolve(&state, &user, &resource)?;
    let body = into_object(body)?;

    let id = state.store.insert(&resource, body)?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "id": id }))))
}

async fn patch_handler(
    State(state): State<AppState>,
    user: AuthedUser,
    Path((resource, id)): Path<(String, i64)>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let resource = resolve(&state, &user, &resource)?;
    let patch = Patch::from_object(into_object(body)?);

    // A missing id is a silent no-op, matching delete's idempotency
    state.store.update(&resource, id, &patch)?;
    Ok(Json(json!({ "status": true })))
}

async fn delete_handler(
    State(state): State<AppState>,
    user: AuthedUser,
    Path((resource, id)): Path<(String, i64)>,
) -> Result<Json<Value>, ApiError> {
    let resource = resolve(&state, &user, &resource)?;

    state.store.delete(&resource, id)?;
    Ok(Json(json!({ "status": true })))
}

async fn updates_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (id, rx) = state.bus.subscribe();
    let guard = SubscriberGuard::new(state.bus.clone(), id);

    let stream = ReceiverStream::new(rx).map(move |msg| {
        // Held until the client disconnects and the stream is dropped
        let _ = &guard;

        Ok(match msg {
            BusMessage::Welcome => Event::default().event("welcome").data("to update stream"),
            BusMessage::Change(event) => Event::default()
                .event("updates")
                .data(serde_json::to_string(&event).unwrap_or_default()),
        })
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
