// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integration tests for the read-only HTTP surface, driven through the
//! router with `tower::ServiceExt::oneshot` rather than a bound socket.

use std::fs;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use harness_http::{build_router, AppState};
use http_body_util::BodyExt;
use tower::ServiceExt;

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let resp = app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn seed_run(base: &std::path::Path, run_id: &str) {
    let run_root = base.join(run_id);
    fs::create_dir_all(run_root.join("logs")).unwrap();
    fs::write(
        run_root.join("logs").join("run.jsonl"),
        "{\"timestamp\":\"2026-01-01T00:00:00Z\",\"level\":\"INFO\",\"run_id\":\"r\",\"flow_key\":\"plan\",\"message\":\"started\"}\n",
    )
    .unwrap();
    fs::create_dir_all(run_root.join("plan").join("receipts")).unwrap();
}

fn receipt_json(step_id: &str, agent_key: &str, started_at: &str) -> serde_json::Value {
    serde_json::json!({
        "schema_version": "1.0.0",
        "engine_id": "stub",
        "transport_mode": "none",
        "run_id": "r",
        "flow_key": "plan",
        "step_id": step_id,
        "agent_key": agent_key,
        "attempt": 1,
        "started_at": started_at,
        "ended_at": started_at,
        "duration_ms": 10,
        "status": "PASS",
        "evidence": { "measured": false, "reason": "no evidence recorded" },
        "receipt_sha256": null,
    })
}

#[tokio::test]
async fn list_runs_finds_seeded_run_directories() {
    let tmp = tempfile::tempdir().unwrap();
    seed_run(tmp.path(), "run-a");
    seed_run(tmp.path(), "run-b");
    let app = build_router(Arc::new(AppState::new(tmp.path())));

    let (status, json) = get_json(app, "/api/runs").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["version"], 1);
    assert_eq!(json["total"], 2);
    assert_eq!(json["runs"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn list_runs_paginates() {
    let tmp = tempfile::tempdir().unwrap();
    seed_run(tmp.path(), "run-a");
    seed_run(tmp.path(), "run-b");
    seed_run(tmp.path(), "run-c");
    let app = build_router(Arc::new(AppState::new(tmp.path())));

    let (_, json) = get_json(app, "/api/runs?limit=2&offset=0").await;

    assert_eq!(json["runs"].as_array().unwrap().len(), 2);
    assert_eq!(json["has_more"], true);
}

#[tokio::test]
async fn timeline_404s_for_unknown_run() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_router(Arc::new(AppState::new(tmp.path())));

    let (status, _) = get_json(app, "/api/runs/no-such-run/timeline").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn timeline_returns_run_level_log_records() {
    let tmp = tempfile::tempdir().unwrap();
    seed_run(tmp.path(), "run-a");
    let app = build_router(Arc::new(AppState::new(tmp.path())));

    let (status, json) = get_json(app, "/api/runs/run-a/timeline").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["events"].as_array().unwrap().len(), 1);
    assert_eq!(json["events"][0]["message"], "started");
}

#[tokio::test]
async fn flow_timing_rejects_unknown_flow() {
    let tmp = tempfile::tempdir().unwrap();
    seed_run(tmp.path(), "run-a");
    let app = build_router(Arc::new(AppState::new(tmp.path())));

    let (status, _) = get_json(app, "/api/runs/run-a/flows/not-a-flow/timing").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn flow_timing_lists_receipted_steps_in_start_order() {
    let tmp = tempfile::tempdir().unwrap();
    seed_run(tmp.path(), "run-a");
    let receipts_dir = tmp.path().join("run-a").join("plan").join("receipts");
    fs::write(
        receipts_dir.join("review-planner.json"),
        serde_json::to_vec(&receipt_json("review", "planner", "2026-01-01T00:02:00Z")).unwrap(),
    )
    .unwrap();
    fs::write(
        receipts_dir.join("author-planner.json"),
        serde_json::to_vec(&receipt_json("author", "planner", "2026-01-01T00:01:00Z")).unwrap(),
    )
    .unwrap();
    let app = build_router(Arc::new(AppState::new(tmp.path())));

    let (status, json) = get_json(app, "/api/runs/run-a/flows/plan/timing").await;

    assert_eq!(status, StatusCode::OK);
    let steps = json["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0]["step_id"], "author");
    assert_eq!(steps[1]["step_id"], "review");
}

#[tokio::test]
async fn step_detail_returns_the_receipt() {
    let tmp = tempfile::tempdir().unwrap();
    seed_run(tmp.path(), "run-a");
    let receipts_dir = tmp.path().join("run-a").join("plan").join("receipts");
    fs::write(
        receipts_dir.join("author-planner.json"),
        serde_json::to_vec(&receipt_json("author", "planner", "2026-01-01T00:01:00Z")).unwrap(),
    )
    .unwrap();
    let app = build_router(Arc::new(AppState::new(tmp.path())));

    let (status, json) = get_json(app, "/api/runs/run-a/flows/plan/steps/author").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["receipt"]["step_id"], "author");
}

#[tokio::test]
async fn step_detail_404s_when_no_receipt_exists() {
    let tmp = tempfile::tempdir().unwrap();
    seed_run(tmp.path(), "run-a");
    let app = build_router(Arc::new(AppState::new(tmp.path())));

    let (status, _) = get_json(app, "/api/runs/run-a/flows/plan/steps/missing").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn selftest_plan_returns_the_full_step_count() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_router(Arc::new(AppState::new(tmp.path())));

    let (status, json) = get_json(app, "/api/selftest/plan").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["steps"].as_array().unwrap().len(), harness_selftest::STEPS.len());
}

#[tokio::test]
async fn platform_status_is_green_with_no_run_id() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_router(Arc::new(AppState::new(tmp.path())));

    let (status, json) = get_json(app, "/platform/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "GREEN");
}

#[tokio::test]
async fn platform_status_404s_for_a_run_with_no_selftest_report() {
    let tmp = tempfile::tempdir().unwrap();
    seed_run(tmp.path(), "run-a");
    let app = build_router(Arc::new(AppState::new(tmp.path())));

    let (status, _) = get_json(app, "/platform/status?run_id=run-a").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn degradations_requires_a_run_id() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_router(Arc::new(AppState::new(tmp.path())));

    let resp = app
        .oneshot(Request::builder().uri("/api/selftest/degradations").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn degradations_returns_an_empty_list_when_the_log_is_absent() {
    let tmp = tempfile::tempdir().unwrap();
    seed_run(tmp.path(), "run-a");
    let app = build_router(Arc::new(AppState::new(tmp.path())));

    let (status, json) = get_json(app, "/api/selftest/degradations?run_id=run-a").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["entries"].as_array().unwrap().len(), 0);
}
