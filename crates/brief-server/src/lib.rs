//! Thin HTTP surface over the admission controller and store.
//!
//! Status codes follow the pipeline contract: 422 for validation
//! problems, 409 when the submission backlog is full, 404 for unknown
//! ids. Everything heavy happens in worker tasks; handlers only enqueue,
//! poll, and signal.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use brief_config::metadata;
use brief_pipeline::{engine::decode_run_json_columns, AdmissionController, SubmitError};
use brief_store::StoreError;
use brief_types::Webhook;

/// Submissions beyond this many live workers are refused with 409.
const MAX_QUEUED_RUNS: usize = 32;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<AdmissionController>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/run", post(submit_run))
        .route("/api/batch", post(submit_batch))
        .route("/api/status/{run_id}", get(run_status))
        .route("/api/kill/{run_id}", post(kill_run))
        .route("/api/kill/batch/{batch_id}", post(kill_batch))
        .route("/api/config", get(get_config).patch(patch_config))
        .route("/api/config/reset", post(reset_config))
        .route("/api/runs", get(list_runs))
        .route("/api/batch/{batch_id}", get(batch_status))
        .route("/api/data/{run_id}/{table}", get(run_data))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "brief server listening");
    axum::serve(listener, router(state)).await
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn submit_error(err: SubmitError) -> Response {
    match err {
        SubmitError::Invalid(e) => error_body(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
        SubmitError::Store(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn store_error(err: StoreError) -> Response {
    match err {
        StoreError::RunNotFound(id) => {
            error_body(StatusCode::NOT_FOUND, format!("run {id} not found"))
        }
        other => error_body(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn submit_run(State(state): State<AppState>, Json(webhook): Json<Webhook>) -> Response {
    if state.controller.active_count().await >= MAX_QUEUED_RUNS {
        return error_body(StatusCode::CONFLICT, "run capacity exceeded, retry later");
    }
    match state.controller.submit(webhook).await {
        Ok(run_id) => Json(json!({ "run_id": run_id })).into_response(),
        Err(err) => submit_error(err),
    }
}

async fn submit_batch(
    State(state): State<AppState>,
    Json(webhooks): Json<Vec<Webhook>>,
) -> Response {
    if webhooks.is_empty() {
        return error_body(StatusCode::UNPROCESSABLE_ENTITY, "batch is empty");
    }
    if state.controller.active_count().await + webhooks.len() > MAX_QUEUED_RUNS {
        return error_body(StatusCode::CONFLICT, "run capacity exceeded, retry later");
    }
    match state.controller.submit_batch(webhooks).await {
        Ok((batch_id, run_ids)) => {
            Json(json!({ "batch_id": batch_id, "run_ids": run_ids })).into_response()
        }
        Err(err) => submit_error(err),
    }
}

/// Poll target: light run row plus the audit trail and a live-worker flag.
async fn run_status(State(state): State<AppState>, Path(run_id): Path<i64>) -> Response {
    let store = state.controller.store();
    let run = match store.get_run(run_id) {
        Ok(run) => run,
        Err(err) => return store_error(err),
    };
    let audit = match store.get_audit_log(run_id) {
        Ok(entries) => entries,
        Err(err) => return store_error(err),
    };

    let light_run = json!({
        "id": run.id,
        "target_domain": run.target_domain,
        "target_company": run.target_company,
        "status": run.status,
        "created_at": run.created_at,
        "completed_at": run.completed_at,
        "featured_buyer_id": run.featured_buyer_id,
        "featured_buyer_name": run.featured_buyer_name,
        "notion_url": run.notion_url,
        "batch_id": run.batch_id,
    });

    Json(json!({
        "run": light_run,
        "audit_log": audit,
        "pipeline_active": state.controller.is_active(run_id).await,
    }))
    .into_response()
}

async fn kill_run(State(state): State<AppState>, Path(run_id): Path<i64>) -> Response {
    let store = state.controller.store();
    if let Err(err) = store.get_run(run_id) {
        return store_error(err);
    }
    match state.controller.kill(run_id).await {
        Ok(signalled) => Json(json!({ "run_id": run_id, "killed": signalled })).into_response(),
        Err(err) => store_error(err),
    }
}

async fn kill_batch(State(state): State<AppState>, Path(batch_id): Path<i64>) -> Response {
    let signalled = state.controller.kill_batch(batch_id).await;
    Json(json!({ "batch_id": batch_id, "killed": signalled })).into_response()
}

async fn get_config(State(state): State<AppState>) -> Response {
    let registry = state.controller.registry();
    Json(json!({
        "values": registry.values().await,
        "metadata": metadata(),
    }))
    .into_response()
}

/// Apply a `{key: value}` object of edits. All-or-nothing is not
/// attempted; edits apply in order and the first bad key aborts.
async fn patch_config(State(state): State<AppState>, Json(patch): Json<Value>) -> Response {
    let Some(entries) = patch.as_object() else {
        return error_body(
            StatusCode::UNPROCESSABLE_ENTITY,
            "config patch must be an object",
        );
    };

    let registry = state.controller.registry();
    for (key, value) in entries {
        if let Err(err) = registry.set_value(key, value).await {
            return error_body(StatusCode::UNPROCESSABLE_ENTITY, err.to_string());
        }
    }
    Json(registry.values().await).into_response()
}

async fn reset_config(State(state): State<AppState>) -> Response {
    let registry = state.controller.registry();
    registry.reset().await;
    Json(registry.values().await).into_response()
}

async fn list_runs(State(state): State<AppState>) -> Response {
    match state.controller.store().get_recent_runs(20) {
        Ok(runs) => Json(runs).into_response(),
        Err(err) => store_error(err),
    }
}

async fn batch_status(State(state): State<AppState>, Path(batch_id): Path<i64>) -> Response {
    match state.controller.store().get_batch_runs(batch_id) {
        Ok(runs) if runs.is_empty() => {
            error_body(StatusCode::NOT_FOUND, format!("batch {batch_id} not found"))
        }
        Ok(runs) => Json(runs).into_response(),
        Err(err) => store_error(err),
    }
}

/// Detailed per-table view for the monitor: the full run row (JSON
/// columns decoded), discoveries, contacts, or audit log.
async fn run_data(
    State(state): State<AppState>,
    Path((run_id, table)): Path<(i64, String)>,
) -> Response {
    let store = state.controller.store();
    match table.as_str() {
        "run" => match store.get_run(run_id) {
            Ok(run) => {
                let raw = serde_json::to_value(&run).unwrap_or(Value::Null);
                Json(decode_run_json_columns(raw)).into_response()
            }
            Err(err) => store_error(err),
        },
        "discoveries" => match store.get_discoveries(run_id) {
            Ok(rows) => Json(rows).into_response(),
            Err(err) => store_error(err),
        },
        "contacts" => match store.get_contacts(run_id) {
            Ok(rows) => Json(rows).into_response(),
            Err(err) => store_error(err),
        },
        "audit_log" => match store.get_audit_log(run_id) {
            Ok(rows) => Json(rows).into_response(),
            Err(err) => store_error(err),
        },
        other => error_body(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("unknown table: {other}"),
        ),
    }
}
