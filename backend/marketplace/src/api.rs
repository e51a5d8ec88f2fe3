//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::approval::Approval;
use crate::auth::SignedProof;
use crate::engine::Engine;
use crate::errors::Result;
use crate::models::{Project, ProjectStatus, Submission};
use crate::projects::CreateProject;
use crate::webhook::{Delivery, WebhookAck, WebhookError, WebhookIngestion, EVENT_HEADER, TOKEN_HEADER};

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<Engine>,
    pub webhook: Arc<WebhookIngestion>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/projects", get(list_projects).post(create_project))
        .route("/projects/:id", get(get_project))
        .route("/projects/:id/status", patch(update_project_status))
        .route("/projects/:id/assign", post(assign_contributor))
        .route("/projects/:id/submissions", get(list_project_submissions))
        .route("/submissions", get(list_submissions).post(create_submission))
        .route(
            "/submissions/:id",
            get(get_submission).delete(delete_submission),
        )
        .route("/submissions/:id/approve", post(approve_submission))
        .route("/webhooks/github", post(github_webhook))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request shapes
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    #[serde(flatten)]
    pub project: CreateProject,
    #[serde(default)]
    pub proof: Option<SignedProof>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub caller: String,
    pub status: String,
    pub proof: Option<SignedProof>,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub caller: String,
    pub contributor: String,
    pub proof: Option<SignedProof>,
}

#[derive(Deserialize)]
pub struct CreateSubmissionRequest {
    pub project_id: String,
    pub submitter: String,
    pub work_reference: String,
    pub proof: Option<SignedProof>,
}

#[derive(Deserialize)]
pub struct DeleteSubmissionRequest {
    pub caller: String,
    pub proof: Option<SignedProof>,
}

#[derive(Deserialize)]
pub struct ApproveRequest {
    pub approver: String,
    pub proof: Option<SignedProof>,
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ProjectResponse {
    pub success: bool,
    pub project: Project,
}

#[derive(Serialize)]
pub struct ProjectsResponse {
    pub count: usize,
    pub projects: Vec<Project>,
}

#[derive(Serialize)]
pub struct SubmissionResponse {
    pub success: bool,
    pub submission: Submission,
}

#[derive(Serialize)]
pub struct SubmissionsResponse {
    pub count: usize,
    pub submissions: Vec<Submission>,
}

#[derive(Serialize)]
pub struct DeletedResponse {
    pub success: bool,
    pub id: String,
}

#[derive(Serialize)]
pub struct ApprovalResponse {
    pub success: bool,
    #[serde(flatten)]
    pub approval: Approval,
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    #[serde(flatten)]
    pub ack: WebhookAck,
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /projects`
pub async fn list_projects(State(state): State<Arc<ApiState>>) -> Result<Json<ProjectsResponse>> {
    let projects = state.engine.list_projects().await?;
    Ok(Json(ProjectsResponse {
        count: projects.len(),
        projects,
    }))
}

/// `POST /projects`
pub async fn create_project(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectResponse>)> {
    let project = state
        .engine
        .create_project(req.project, req.proof.as_ref())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ProjectResponse {
            success: true,
            project,
        }),
    ))
}

/// `GET /projects/:id`
pub async fn get_project(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<ProjectResponse>> {
    let project = state.engine.get_project(&id).await?;
    Ok(Json(ProjectResponse {
        success: true,
        project,
    }))
}

/// `PATCH /projects/:id/status`
pub async fn update_project_status(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<ProjectResponse>> {
    let status: ProjectStatus = req.status.trim().parse()?;
    let project = state
        .engine
        .update_project_status(&id, &req.caller, status, req.proof.as_ref())
        .await?;
    Ok(Json(ProjectResponse {
        success: true,
        project,
    }))
}

/// `POST /projects/:id/assign`
pub async fn assign_contributor(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(req): Json<AssignRequest>,
) -> Result<Json<ProjectResponse>> {
    let project = state
        .engine
        .assign_contributor(&id, &req.caller, &req.contributor, req.proof.as_ref())
        .await?;
    Ok(Json(ProjectResponse {
        success: true,
        project,
    }))
}

/// `GET /projects/:id/submissions`
pub async fn list_project_submissions(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<SubmissionsResponse>> {
    let submissions = state.engine.list_project_submissions(&id).await?;
    Ok(Json(SubmissionsResponse {
        count: submissions.len(),
        submissions,
    }))
}

/// `GET /submissions`
pub async fn list_submissions(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<SubmissionsResponse>> {
    let submissions = state.engine.list_submissions().await?;
    Ok(Json(SubmissionsResponse {
        count: submissions.len(),
        submissions,
    }))
}

/// `POST /submissions`
pub async fn create_submission(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateSubmissionRequest>,
) -> Result<(StatusCode, Json<SubmissionResponse>)> {
    let submission = state
        .engine
        .create_submission(
            &req.project_id,
            &req.submitter,
            &req.work_reference,
            req.proof.as_ref(),
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmissionResponse {
            success: true,
            submission,
        }),
    ))
}

/// `GET /submissions/:id`
pub async fn get_submission(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<SubmissionResponse>> {
    let submission = state.engine.get_submission(&id).await?;
    Ok(Json(SubmissionResponse {
        success: true,
        submission,
    }))
}

/// `DELETE /submissions/:id`
pub async fn delete_submission(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(req): Json<DeleteSubmissionRequest>,
) -> Result<Json<DeletedResponse>> {
    state
        .engine
        .delete_submission(&id, &req.caller, req.proof.as_ref())
        .await?;
    Ok(Json(DeletedResponse { success: true, id }))
}

/// `POST /submissions/:id/approve`
pub async fn approve_submission(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(req): Json<ApproveRequest>,
) -> Result<Json<ApprovalResponse>> {
    let approval = state
        .engine
        .approve(&id, &req.approver, req.proof.as_ref())
        .await?;
    Ok(Json(ApprovalResponse {
        success: true,
        approval,
    }))
}

/// `POST /webhooks/github`
///
/// Non-merge and unmatched deliveries answer 200 so the code host does not
/// retry them; engine failures answer with an error status so it does.
pub async fn github_webhook(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Json<WebhookResponse>, WebhookError> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let ack = state
        .webhook
        .ingest(Delivery {
            event: header(EVENT_HEADER),
            token: header(TOKEN_HEADER),
            body: &body,
        })
        .await?;
    Ok(Json(WebhookResponse { success: true, ack }))
}
