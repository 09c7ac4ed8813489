//! HTTP API integration tests
//!
//! Drives the router directly with `tower::ServiceExt::oneshot` against
//! stubbed collaborators.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use policy_parity::config::{RetrySettings, RunSettings};
use policy_parity::pipeline::report::ReportRow;
use policy_parity::pipeline::Orchestrator;
use policy_parity::progress::ProgressTracker;
use policy_parity::services::{
    ErpSource, ModelError, NotionSource, ReportWriteError, ReportWriter, SourceFetchError,
    VerdictModel,
};
use policy_parity::types::{ModelVerdict, RawRecord, SourceKind, VerdictClass};
use policy_parity::AppState;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

fn erp_raw(name: &str) -> RawRecord {
    RawRecord {
        source: SourceKind::Erp,
        payload: json!({
            "id": 1,
            "name": name,
            "evaluationType": "ERP_CONDITION",
            "gptPromptParamConditions": [{
                "priority": 1,
                "value": "v",
                "expression": {
                    "leaf": true,
                    "fieldName": "Client_Type",
                    "operation": "=",
                    "value": "CC"
                }
            }]
        }),
    }
}

fn notion_raw(name: &str) -> RawRecord {
    RawRecord {
        source: SourceKind::Notion,
        payload: json!({
            "page_id": "abc123",
            "page_name": name,
            "blocks": [
                { "type": "heading_1", "text": "Technical ECP", "depth": 0 },
                {
                    "type": "toggle",
                    "text": format!("Technical ECP Parameter Name: {}", name),
                    "depth": 1
                },
                { "type": "toggle", "text": "Condition Client_Type == CC", "depth": 1 },
                { "type": "paragraph", "text": "v", "depth": 2 }
            ]
        }),
    }
}

struct StubErp(Vec<RawRecord>);

#[async_trait]
impl ErpSource for StubErp {
    async fn fetch_by_prompt_name(&self, _: &str) -> Result<Vec<RawRecord>, SourceFetchError> {
        Ok(self.0.clone())
    }
}

struct StubNotion(Vec<RawRecord>);

#[async_trait]
impl NotionSource for StubNotion {
    async fn fetch_page_records(&self, _: &str) -> Result<Vec<RawRecord>, SourceFetchError> {
        Ok(self.0.clone())
    }
}

struct StubModel {
    delay: Duration,
}

#[async_trait]
impl VerdictModel for StubModel {
    async fn compare(&self, _: &str, _: &str) -> Result<ModelVerdict, ModelError> {
        tokio::time::sleep(self.delay).await;
        Ok(ModelVerdict {
            class: VerdictClass::Equivalent,
            explanation: "No significant functional differences found.".to_string(),
            confidence: Some(1.0),
        })
    }
}

struct StubWriter;

#[async_trait]
impl ReportWriter for StubWriter {
    async fn write(&self, _: &[ReportRow]) -> Result<String, ReportWriteError> {
        Ok("stub://report".to_string())
    }
}

/// App over stubbed sources that hold the same parameter names on both
/// sides, so every name becomes one matched pair
fn test_app(names: &[&str], model_delay: Duration) -> axum::Router {
    let erp = names.iter().map(|n| erp_raw(n)).collect();
    let notion = names.iter().map(|n| notion_raw(n)).collect();

    let orchestrator = Orchestrator::new(
        Arc::new(StubErp(erp)),
        Arc::new(StubNotion(notion)),
        Arc::new(StubModel { delay: model_delay }),
        Arc::new(StubWriter),
        RunSettings {
            comparator_concurrency: 2,
            stage_timeout_secs: 30,
            retry: RetrySettings {
                max_attempts: 2,
                base_delay_ms: 1,
                multiplier: 2.0,
            },
        },
        ProgressTracker::new(),
    );
    policy_parity::build_router(AppState::new(Arc::new(orchestrator)))
}

fn compare_body() -> Value {
    json!({
        "prompt_name": "TestPrompt",
        "page_id": "a".repeat(32),
    })
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll /api/progress until the run is observably in the given status
async fn wait_for_status(app: &axum::Router, status: &str) -> bool {
    for _ in 0..100 {
        let response = app
            .clone()
            .oneshot(Request::get("/api/progress").body(Body::empty()).unwrap())
            .await
            .unwrap();
        if body_json(response).await["status"] == status {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn health_reports_module_and_uptime() {
    let app = test_app(&[], Duration::ZERO);
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["module"], "policy-parity");
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn compare_without_selectors_is_rejected_before_any_state_change() {
    let app = test_app(&[], Duration::ZERO);

    let response = app
        .clone()
        .oneshot(post_json("/api/compare", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    // The rejected request must not have started a run
    let response = app
        .oneshot(Request::get("/api/progress").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "not_started");
    assert_eq!(body["progress_percentage"], 0);
}

#[tokio::test]
async fn compare_completes_and_returns_a_summary() {
    let app = test_app(&["Doctor_Fee"], Duration::ZERO);

    let response = app
        .clone()
        .oneshot(post_json("/api/compare", compare_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["summary"]["erp_records"], 1);
    assert_eq!(body["summary"]["notion_records"], 1);
    assert_eq!(body["summary"]["total_comparisons"], 1);
    assert_eq!(body["summary"]["total_rows"], 1);
    assert_eq!(body["sheet_url"], "stub://report");

    // Progress reflects the finished run
    let response = app
        .oneshot(Request::get("/api/progress").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["progress_percentage"], 100);
    let logs = body["logs"].as_array().unwrap();
    assert!(!logs.is_empty());
    assert!(logs[0]["message"].is_string());
    assert!(logs[0]["type"].is_string());
    assert!(logs[0]["timestamp"].is_string());
}

#[tokio::test]
async fn second_compare_while_running_conflicts() {
    // Several matched pairs and a slow model keep the first run busy
    let app = test_app(&["K0", "K1", "K2", "K3"], Duration::from_millis(300));

    let first = {
        let app = app.clone();
        tokio::spawn(async move { app.oneshot(post_json("/api/compare", compare_body())).await })
    };

    assert!(
        wait_for_status(&app, "running").await,
        "first run never became observable"
    );

    let response = app
        .clone()
        .oneshot(post_json("/api/compare", compare_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "CONFLICT");

    let response = first.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn stop_without_a_run_is_a_safe_noop() {
    let app = test_app(&[], Duration::ZERO);

    let response = app
        .clone()
        .oneshot(post_json("/api/stop", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert!(body["message"].as_str().unwrap().contains("No comparison"));

    // Repeat: still a no-op
    let response = app.oneshot(post_json("/api/stop", json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn stop_during_a_run_cancels_it() {
    let app = test_app(&["K0", "K1", "K2", "K3"], Duration::from_millis(300));

    let first = {
        let app = app.clone();
        tokio::spawn(async move { app.oneshot(post_json("/api/compare", compare_body())).await })
    };

    assert!(
        wait_for_status(&app, "running").await,
        "run never became observable"
    );

    let response = app
        .clone()
        .oneshot(post_json("/api/stop", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = first.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("cancelled"));

    assert!(wait_for_status(&app, "cancelled").await);
}
