//! API route handlers for the gateway.
//!
//! Every response carries a `success` flag; failures add `error` and a
//! stable `category` taken from [`FlowError::category`].

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use flowdeck_core::FlowError;
use flowdeck_scheduler::{NewWorkflow, WorkflowPatch};
use std::collections::HashMap;
use std::sync::Arc;

use super::server::AppState;

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn status_for(err: &FlowError) -> StatusCode {
    match err {
        FlowError::Validation(_) => StatusCode::BAD_REQUEST,
        FlowError::NotFound(_) => StatusCode::NOT_FOUND,
        FlowError::StoreUnavailable(_) | FlowError::Io(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Structured error body. Internal failures are logged here, not leaked raw.
fn error_response(context: &str, err: FlowError) -> ApiResponse {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!("[{context}] {err}");
    } else {
        tracing::debug!("[{context}] {err}");
    }
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "category": err.category(),
        })),
    )
}

fn ok(body: serde_json::Value) -> ApiResponse {
    (StatusCode::OK, Json(body))
}

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "flowdeck-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ---- Workflow API ----

/// Save a new workflow.
pub async fn save_workflow(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResponse {
    let new: NewWorkflow = match serde_json::from_value(body) {
        Ok(n) => n,
        Err(e) => {
            return error_response(
                "Workflow Save",
                FlowError::validation(format!("Invalid workflow: {e}")),
            );
        }
    };
    match state.service.save(new).await {
        Ok(workflow) => ok(serde_json::json!({
            "success": true,
            "workflowId": workflow.id,
            "workflow": workflow,
        })),
        Err(e) => error_response("Workflow Save", e),
    }
}

/// List saved workflows, newest first.
pub async fn list_workflows(State(state): State<Arc<AppState>>) -> ApiResponse {
    match state.service.list().await {
        Ok(workflows) => {
            tracing::debug!("[Workflow List] Found {} workflow(s)", workflows.len());
            ok(serde_json::json!({"success": true, "workflows": workflows}))
        }
        Err(e) => error_response("Workflow List", e),
    }
}

/// Load one workflow: `?id=<workflowId>`.
pub async fn load_workflow(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    let Some(id) = params.get("id").map(|s| s.trim()).filter(|s| !s.is_empty()) else {
        return error_response(
            "Workflow Load",
            FlowError::validation("Workflow ID is required"),
        );
    };
    match state.service.get(id).await {
        Ok(workflow) => ok(serde_json::json!({"success": true, "workflow": workflow})),
        Err(e) => error_response("Workflow Load", e),
    }
}

/// Partially update a workflow.
pub async fn update_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> ApiResponse {
    let patch: WorkflowPatch = match serde_json::from_value(body) {
        Ok(p) => p,
        Err(e) => {
            return error_response(
                "Workflow Update",
                FlowError::validation(format!("Invalid update: {e}")),
            );
        }
    };
    match state.service.update(&id, patch).await {
        Ok(workflow) => ok(serde_json::json!({"success": true, "workflow": workflow})),
        Err(e) => error_response("Workflow Update", e),
    }
}

/// Delete a workflow.
pub async fn delete_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.service.delete(&id).await {
        Ok(()) => ok(serde_json::json!({"success": true, "id": id})),
        Err(e) => error_response("Workflow Delete", e),
    }
}

// ---- Scheduler API ----

/// Start the scheduler if it is not already running.
pub async fn scheduler_init(State(state): State<Arc<AppState>>) -> ApiResponse {
    let bootstrap = state.bootstrap();
    if bootstrap.is_running() {
        return ok(serde_json::json!({
            "success": true,
            "message": "Scheduler already initialized",
        }));
    }
    let scheduler = bootstrap.ensure_started();
    if scheduler.is_running() {
        tracing::info!("[Scheduler Init] Workflow scheduler initialized");
        ok(serde_json::json!({"success": true, "message": "Workflow scheduler started"}))
    } else {
        error_response(
            "Scheduler Init",
            FlowError::Config("scheduler could not be started".into()),
        )
    }
}

/// Scheduler status and recent runs.
pub async fn scheduler_status(State(state): State<Arc<AppState>>) -> ApiResponse {
    let status = state.bootstrap().scheduler().status();
    ok(serde_json::json!({
        "success": true,
        "status": status,
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Stop the polling loop. In-flight runs finish; no new scans start.
pub async fn scheduler_stop(State(state): State<Arc<AppState>>) -> ApiResponse {
    let stopped = state
        .bootstrap()
        .existing()
        .is_some_and(|scheduler| scheduler.stop());
    ok(serde_json::json!({"success": true, "stopped": stopped}))
}
