use anyhow::Result;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Router,
};
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::domain::{ProjectDraft, RequestStatus, ResourceDraft, ResourcePatch};
use crate::error::AllocationError;
use crate::service::{AllocationFilter, AllocationService, ConflictTarget};
use crate::workflow::{CommitMode, CommitRequest, CommitTarget, ConflictRef, Suggestion};

struct ServerError(AllocationError);

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AllocationError::NotFound { .. } => StatusCode::NOT_FOUND,
            AllocationError::Validation(_) | AllocationError::InvalidSelection { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AllocationError::Oracle(_) => StatusCode::BAD_GATEWAY,
            AllocationError::Persistence { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("{}", self.0);
        }
        let mut body = serde_json::json!({
            "error": self.0.to_string(),
            "retryable": self.0.is_retryable(),
        });
        if let AllocationError::Persistence { committed, .. } = &self.0 {
            body["committed"] = serde_json::json!(committed);
        }
        if let AllocationError::InvalidSelection { rejected } = &self.0 {
            body["rejected"] = serde_json::json!(rejected);
        }
        (status, Json(body)).into_response()
    }
}

impl From<AllocationError> for ServerError {
    fn from(err: AllocationError) -> Self {
        Self(err)
    }
}

type ApiResult<T> = std::result::Result<T, ServerError>;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AllocationService>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SuggestBody {
    #[serde(default)]
    pool: Option<Vec<String>>,
    #[serde(default)]
    priority_factors: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitBody {
    suggestions: Vec<Suggestion>,
    mode: ModeKind,
    #[serde(default)]
    selections: Vec<String>,
    #[serde(default)]
    idempotency_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum ModeKind {
    Auto,
    Manual,
}

impl CommitBody {
    fn mode(&self) -> CommitMode {
        match self.mode {
            ModeKind::Auto => CommitMode::Auto,
            ModeKind::Manual => CommitMode::Manual(self.selections.clone()),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestBody {
    resource_id: String,
    project_id: String,
}

#[derive(Deserialize)]
struct RequestQuery {
    status: Option<RequestStatus>,
}

#[derive(Deserialize)]
struct ChatBody {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractBody {
    project_description: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/resources", get(list_resources).post(register_resource))
        .route("/resources/{id}", get(get_resource).patch(update_resource))
        .route("/resources/{id}/suggestions", post(suggest_projects))
        .route("/resources/{id}/allocations", post(commit_for_resource))
        .route("/projects", get(list_projects).post(create_project))
        .route("/projects/{id}/suggestions", post(suggest_resources))
        .route("/projects/{id}/allocations", post(commit_for_project))
        .route("/allocations", get(list_allocations))
        .route("/allocations/{id}", delete(deallocate))
        .route("/allocations/{id}/resolve", post(resolve_allocation))
        .route("/conflicts/resolve", post(resolve_pair))
        .route("/requests", get(list_requests).post(submit_request))
        .route("/requests/{id}/approve", post(approve_request))
        .route("/requests/{id}/reject", post(reject_request))
        .route("/chat", post(chat))
        .route("/skills/extract", post(extract_skills))
        .route("/events", get(events))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(service: Arc<AllocationService>, bind: &str) -> Result<()> {
    let app = router(AppState { service });
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("🚀 Talent Flow API ready: http://{}", bind);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn list_resources(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.list_resources().await?))
}

async fn get_resource(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.get_resource(&id).await?))
}

async fn register_resource(
    State(state): State<AppState>,
    Json(draft): Json<ResourceDraft>,
) -> ApiResult<impl IntoResponse> {
    let resource = state.service.register_resource(draft).await?;
    Ok((StatusCode::CREATED, Json(resource)))
}

async fn update_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<ResourcePatch>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.update_resource(&id, patch).await?))
}

async fn list_projects(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.list_projects().await?))
}

async fn create_project(
    State(state): State<AppState>,
    Json(draft): Json<ProjectDraft>,
) -> ApiResult<impl IntoResponse> {
    let project = state.service.create_project(draft).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn suggest_resources(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SuggestBody>,
) -> ApiResult<impl IntoResponse> {
    let suggestions = state
        .service
        .suggest_resources_for_project(&id, body.pool.as_deref(), body.priority_factors.as_deref())
        .await?;
    Ok(Json(suggestions))
}

async fn suggest_projects(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SuggestBody>,
) -> ApiResult<impl IntoResponse> {
    let suggestions = state
        .service
        .suggest_projects_for_resource(&id, body.pool.as_deref())
        .await?;
    Ok(Json(suggestions))
}

async fn commit(state: &AppState, target: CommitTarget, body: CommitBody) -> ApiResult<Response> {
    let outcome = state
        .service
        .commit_allocation(CommitRequest {
            target,
            mode: body.mode(),
            suggestions: body.suggestions,
            thresholds: None,
            idempotency_key: body.idempotency_key,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)).into_response())
}

async fn commit_for_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CommitBody>,
) -> ApiResult<Response> {
    commit(&state, CommitTarget::Project(id), body).await
}

async fn commit_for_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CommitBody>,
) -> ApiResult<Response> {
    commit(&state, CommitTarget::Resource(id), body).await
}

async fn list_allocations(
    State(state): State<AppState>,
    Query(filter): Query<AllocationFilter>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.list_allocations(&filter).await?))
}

async fn deallocate(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    state.service.deallocate(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resolve_allocation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let suggestion = state
        .service
        .resolve_conflict(&ConflictTarget::Allocation { allocation_id: id })
        .await?;
    Ok(Json(serde_json::json!({ "suggestion": suggestion })))
}

async fn resolve_pair(
    State(state): State<AppState>,
    Json(pair): Json<ConflictRef>,
) -> ApiResult<impl IntoResponse> {
    let suggestion = state.service.resolve_conflict(&ConflictTarget::Pair(pair)).await?;
    Ok(Json(serde_json::json!({ "suggestion": suggestion })))
}

async fn list_requests(
    State(state): State<AppState>,
    Query(query): Query<RequestQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.list_requests(query.status).await?))
}

async fn submit_request(
    State(state): State<AppState>,
    Json(body): Json<RequestBody>,
) -> ApiResult<impl IntoResponse> {
    let request = state.service.submit_request(&body.resource_id, &body.project_id).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn approve_request(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.approve_request(&id).await?))
}

async fn reject_request(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.reject_request(&id).await?))
}

async fn chat(State(state): State<AppState>, Json(body): Json<ChatBody>) -> ApiResult<impl IntoResponse> {
    let summary = state.service.chat(&body.message).await?;
    Ok(Json(serde_json::json!({ "allocationSummary": summary })))
}

async fn extract_skills(
    State(state): State<AppState>,
    Json(body): Json<ExtractBody>,
) -> ApiResult<impl IntoResponse> {
    let skills = state.service.extract_skills(&body.project_description).await?;
    Ok(Json(serde_json::json!({ "skills": skills })))
}

/// Store change feed as server-sent events.
async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let rx = state.service.subscribe();
    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let sse = Event::default().json_data(&event).unwrap_or_else(|_| Event::default());
                    return Some((Ok(sse), rx));
                }
                Err(RecvError::Lagged(n)) => warn!("Event stream lagged by {} events", n),
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
