/// API Request Handlers
/// Thin translation between HTTP and the orchestration facade

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::{ApiError, BackupRun, ErrorKind, NewTarget, Orchestrator, Target};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// HTTP status for each error kind
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyRunning => StatusCode::CONFLICT,
        ErrorKind::UnsupportedEngine => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::StoreError => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::ExecutionFailure => StatusCode::BAD_GATEWAY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
    }
}

pub struct HandlerError(ApiError);

impl From<ApiError> for HandlerError {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind);
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.0),
        };
        (status, Json(body)).into_response()
    }
}

type HandlerResult<T> = Result<Json<ApiResponse<T>>, HandlerError>;

#[derive(Deserialize)]
pub struct RunsQuery {
    #[serde(default)]
    target_id: Option<u64>,
}

// ============================================================================
// Target Handlers
// ============================================================================

pub async fn list_targets(State(orch): State<Orchestrator>) -> HandlerResult<Vec<Target>> {
    Ok(Json(ApiResponse::ok(orch.list_targets().await?)))
}

pub async fn add_target(
    State(orch): State<Orchestrator>,
    Json(input): Json<NewTarget>,
) -> Result<(StatusCode, Json<ApiResponse<Target>>), HandlerError> {
    let target = orch.add_target(input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(target))))
}

pub async fn get_target(
    State(orch): State<Orchestrator>,
    Path(id): Path<u64>,
) -> HandlerResult<Target> {
    Ok(Json(ApiResponse::ok(orch.get_target(id).await?)))
}

pub async fn remove_target(
    State(orch): State<Orchestrator>,
    Path(id): Path<u64>,
) -> HandlerResult<Target> {
    Ok(Json(ApiResponse::ok(orch.remove_target(id).await?)))
}

// ============================================================================
// Backup Handlers
// ============================================================================

pub async fn run_backup(
    State(orch): State<Orchestrator>,
    Path(id): Path<u64>,
) -> HandlerResult<BackupRun> {
    Ok(Json(ApiResponse::ok(orch.run_backup(id).await?)))
}

pub async fn list_runs(
    State(orch): State<Orchestrator>,
    Query(params): Query<RunsQuery>,
) -> HandlerResult<Vec<BackupRun>> {
    Ok(Json(ApiResponse::ok(orch.list_runs(params.target_id).await?)))
}

// ============================================================================
// Monitoring Handlers
// ============================================================================

pub async fn health_check() -> Json<ApiResponse<String>> {
    Json(ApiResponse::ok("healthy".to_string()))
}

// ============================================================================
// Legacy Handlers
// ============================================================================
//
// Request and response shapes of the original flat-file service, kept so
// existing scripts continue to work.

#[derive(Deserialize)]
pub struct LegacyAddRequest {
    #[serde(default, rename = "type")]
    db_type: String,
    #[serde(default)]
    container_name: String,
    #[serde(default)]
    db_name: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
pub struct LegacyBackupRequest {
    id: Option<u64>,
}

fn legacy_error(err: ApiError) -> Response {
    let status = status_for(err.kind);
    (status, Json(json!({ "error": err.message, "kind": err.kind }))).into_response()
}

fn legacy_record(target: &Target) -> serde_json::Value {
    json!({
        "id": target.id,
        "type": target.engine,
        "container_name": target.location,
        "db_name": target.database_name,
        "username": target.credentials.username,
        "password": target.credentials.secret,
    })
}

pub async fn legacy_add_db(
    State(orch): State<Orchestrator>,
    Json(req): Json<LegacyAddRequest>,
) -> Response {
    let input = NewTarget {
        engine: req.db_type,
        location: req.container_name,
        database_name: req.db_name,
        username: req.username,
        secret: req.password,
    };

    match orch.add_target(input).await {
        Ok(target) => (
            StatusCode::CREATED,
            Json(json!({
                "message": "Database configuration added successfully",
                "id": target.id,
            })),
        )
            .into_response(),
        Err(e) => legacy_error(e),
    }
}

pub async fn legacy_get_db(State(orch): State<Orchestrator>) -> Response {
    match orch.list_targets().await {
        Ok(targets) => {
            let records: Vec<serde_json::Value> = targets.iter().map(legacy_record).collect();
            Json(records).into_response()
        }
        Err(e) => legacy_error(e),
    }
}

pub async fn legacy_backup(
    State(orch): State<Orchestrator>,
    Json(req): Json<LegacyBackupRequest>,
) -> Response {
    let Some(id) = req.id else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing database ID", "kind": ErrorKind::ValidationError })),
        )
            .into_response();
    };

    match orch.run_backup(id).await {
        Ok(run) => Json(json!({
            "message": "Backup completed successfully",
            "backup_file": run.artifact_path,
        }))
        .into_response(),
        Err(e) => legacy_error(e),
    }
}
