// SPDX-License-Identifier: MIT OR Apache-2.0
//! External HTTP Interfaces (§6): a read-only view over a run's on-disk
//! artifacts for the UI. Every handler reads directly off `RUN_BASE`;
//! there is no in-memory cache to keep warm or invalidate.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod api;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Path as AxPath, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use harness_core::{DegradationEntry, Receipt, FLOW_KEYS};
use harness_selftest::{SelftestReport, Severity, STEPS};
use serde::Deserialize;
use tokio::fs;
use tracing::warn;

use api::{
    ApiError, DegradationsResponse, FlowTimingResponse, PlatformStatus, PlatformStatusResponse,
    RunSummary, RunsResponse, SelftestPlanResponse, SelftestStepSummary, StepDetailResponse,
    StepTiming, TimelineResponse,
};

/// Response schema version stamped on every payload. Bump on a breaking
/// shape change.
pub const HTTP_API_VERSION: u32 = 1;

/// Shared state for every handler: the root directory runs are written
/// under (`RUN_BASE`).
#[derive(Clone)]
pub struct AppState {
    /// `RUN_BASE`.
    pub run_base: PathBuf,
}

impl AppState {
    /// Build state rooted at `run_base`.
    #[must_use]
    pub fn new(run_base: impl Into<PathBuf>) -> Self {
        Self { run_base: run_base.into() }
    }

    fn run_root(&self, run_id: &str) -> PathBuf {
        self.run_base.join(run_id)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.code.as_str() {
            "not_found" => axum::http::StatusCode::NOT_FOUND,
            "invalid_request" => axum::http::StatusCode::BAD_REQUEST,
            _ => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

/// Build the router wiring every read-only endpoint (§6) over `state`.
#[must_use]
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/runs", get(list_runs))
        .route("/api/runs/{run_id}/timeline", get(run_timeline))
        .route("/api/runs/{run_id}/flows/{flow_key}/timing", get(flow_timing))
        .route("/api/runs/{run_id}/flows/{flow_key}/steps/{step_id}", get(step_detail))
        .route("/api/selftest/plan", get(selftest_plan))
        .route("/platform/status", get(platform_status))
        .route("/api/selftest/degradations", get(degradations))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct RunsQuery {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
}

async fn list_runs(Query(q): Query<RunsQuery>, State(state): State<Arc<AppState>>) -> Result<Json<RunsResponse>, ApiError> {
    let limit = q.limit.unwrap_or(20).max(1);
    let offset = q.offset.unwrap_or(0);

    let mut entries = fs::read_dir(&state.run_base)
        .await
        .map_err(|e| ApiError::not_found(format!("run base unreadable: {e}")))?;

    let mut runs: Vec<(std::time::SystemTime, RunSummary)> = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(e)) => e,
            Ok(None) => break,
            Err(err) => {
                warn!(error = ?err, "failed to iterate run base");
                continue;
            }
        };
        let path = entry.path();
        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(err) => {
                warn!(path = %path.display(), error = ?err, "failed to stat run directory");
                continue;
            }
        };
        if !metadata.is_dir() {
            continue;
        }
        let run_id = entry.file_name().to_string_lossy().into_owned();
        let modified = metadata.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        let mut flows_present = Vec::new();
        for flow in FLOW_KEYS {
            if fs::metadata(path.join(flow)).await.is_ok() {
                flows_present.push(flow.to_string());
            }
        }
        let modified_at: DateTime<Utc> = modified.into();
        runs.push((
            modified,
            RunSummary { run_id, modified_at: modified_at.to_rfc3339(), flows_present },
        ));
    }

    runs.sort_by(|a, b| b.0.cmp(&a.0));
    let total = runs.len();
    let page: Vec<RunSummary> = runs.into_iter().skip(offset).take(limit).map(|(_, r)| r).collect();
    let has_more = offset + page.len() < total;

    Ok(Json(RunsResponse { version: HTTP_API_VERSION, runs: page, total, limit, offset, has_more }))
}

async fn run_timeline(
    AxPath(run_id): AxPath<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<TimelineResponse>, ApiError> {
    let run_root = state.run_root(&run_id);
    if fs::metadata(&run_root).await.is_err() {
        return Err(ApiError::not_found(format!("run {run_id} not found")));
    }

    let mut events = Vec::new();
    read_jsonl_into(&run_root.join("logs").join("run.jsonl"), &mut events).await;
    for flow in FLOW_KEYS {
        let logs_dir = run_root.join(flow).join("logs");
        let Ok(mut dir) = fs::read_dir(&logs_dir).await else { continue };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("jsonl") {
                read_jsonl_into(&path, &mut events).await;
            }
        }
    }
    events.sort_by(|a: &harness_telemetry::LogRecord, b| a.timestamp.cmp(&b.timestamp));

    Ok(Json(TimelineResponse { version: HTTP_API_VERSION, run_id, events }))
}

async fn read_jsonl_into<T: serde::de::DeserializeOwned>(path: &Path, out: &mut Vec<T>) {
    let Ok(bytes) = fs::read(path).await else { return };
    let text = String::from_utf8_lossy(&bytes);
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(record) => out.push(record),
            Err(err) => warn!(path = %path.display(), error = ?err, "skipping unparseable JSONL line"),
        }
    }
}

async fn flow_timing(
    AxPath((run_id, flow_key)): AxPath<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<FlowTimingResponse>, ApiError> {
    if !FLOW_KEYS.contains(&flow_key.as_str()) {
        return Err(ApiError::invalid_request(format!("unknown flow {flow_key}")));
    }
    let receipts_dir = state.run_root(&run_id).join(&flow_key).join("receipts");
    let mut steps = Vec::new();
    if let Ok(mut dir) = fs::read_dir(&receipts_dir).await {
        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<Receipt>(&bytes) {
                    Ok(r) => steps.push(StepTiming {
                        step_id: r.step_id,
                        agent_key: r.agent_key,
                        attempt: r.attempt,
                        status: r.status,
                        duration_ms: r.duration_ms,
                        started_at: r.started_at,
                        ended_at: r.ended_at,
                    }),
                    Err(err) => warn!(path = %path.display(), error = ?err, "skipping unparseable receipt"),
                },
                Err(err) => warn!(path = %path.display(), error = ?err, "failed to read receipt"),
            }
        }
    }
    steps.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.step_id.cmp(&b.step_id)));

    Ok(Json(FlowTimingResponse { version: HTTP_API_VERSION, flow_key, steps }))
}

async fn step_detail(
    AxPath((run_id, flow_key, step_id)): AxPath<(String, String, String)>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<StepDetailResponse>, ApiError> {
    if !FLOW_KEYS.contains(&flow_key.as_str()) {
        return Err(ApiError::invalid_request(format!("unknown flow {flow_key}")));
    }
    let receipts_dir = state.run_root(&run_id).join(&flow_key).join("receipts");
    let prefix = format!("{}-", harness_store::normalize(&step_id));

    let mut dir = fs::read_dir(&receipts_dir)
        .await
        .map_err(|_| ApiError::not_found(format!("no receipts for step {step_id}")))?;
    let mut candidates: Vec<PathBuf> = Vec::new();
    while let Ok(Some(entry)) = dir.next_entry().await {
        let path = entry.path();
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if file_name.starts_with(&prefix) && file_name.ends_with(".json") {
            candidates.push(path);
        }
    }
    candidates.sort();
    let path = candidates
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::not_found(format!("step {step_id} has no receipt")))?;

    let bytes = fs::read(&path).await.map_err(|e| ApiError::internal(format!("failed to read receipt: {e}")))?;
    let receipt: Receipt =
        serde_json::from_slice(&bytes).map_err(|e| ApiError::internal(format!("receipt decode failed: {e}")))?;

    Ok(Json(StepDetailResponse { version: HTTP_API_VERSION, receipt }))
}

async fn selftest_plan() -> Json<SelftestPlanResponse> {
    let steps = STEPS
        .iter()
        .map(|s| SelftestStepSummary {
            step_id: s.step_id.to_string(),
            name: s.name.to_string(),
            tier: s.tier,
            severity: s.severity,
            category: s.category.to_string(),
            dependencies: s.dependencies.iter().map(|d| d.to_string()).collect(),
        })
        .collect();
    Json(SelftestPlanResponse { version: HTTP_API_VERSION, steps })
}

#[derive(Debug, Deserialize)]
struct PlatformStatusQuery {
    run_id: Option<String>,
}

async fn platform_status(
    Query(q): Query<PlatformStatusQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<PlatformStatusResponse>, ApiError> {
    let Some(run_id) = q.run_id else {
        return Ok(Json(PlatformStatusResponse { version: HTTP_API_VERSION, status: PlatformStatus::Green, run_id: None }));
    };

    let report_path = state.run_root(&run_id).join("build").join("selftest_report.json");
    let bytes = fs::read(&report_path)
        .await
        .map_err(|_| ApiError::not_found(format!("no selftest report for run {run_id}")))?;
    let report: SelftestReport =
        serde_json::from_slice(&bytes).map_err(|e| ApiError::internal(format!("report decode failed: {e}")))?;

    let status = if report.summary.by_severity.get(Severity::Critical.as_str()).copied().unwrap_or(0) > 0 {
        PlatformStatus::Red
    } else if report.summary.by_severity.get(Severity::Warning.as_str()).copied().unwrap_or(0) > 0 {
        PlatformStatus::Yellow
    } else {
        PlatformStatus::Green
    };

    Ok(Json(PlatformStatusResponse { version: HTTP_API_VERSION, status, run_id: Some(run_id) }))
}

#[derive(Debug, Deserialize)]
struct DegradationsQuery {
    run_id: String,
    #[serde(default)]
    limit: Option<usize>,
}

async fn degradations(
    Query(q): Query<DegradationsQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<DegradationsResponse>, ApiError> {
    let limit = q.limit.unwrap_or(50).max(1);
    let path = state.run_root(&q.run_id).join("selftest_degradations.log");
    let mut entries: Vec<DegradationEntry> = Vec::new();
    read_jsonl_into(&path, &mut entries).await;
    if entries.len() > limit {
        let drop = entries.len() - limit;
        entries.drain(0..drop);
    }

    Ok(Json(DegradationsResponse { version: HTTP_API_VERSION, entries }))
}
