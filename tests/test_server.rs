//! Integration tests: inference service endpoints

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bikeshare_mlops::registry::{ModelArtifact, ModelVersion, ServedModel, Stage};
use bikeshare_mlops::server::{create_router, AppState, AuditKind, AuditLog, HealthResponse, PredictResponse};
use bikeshare_mlops::training::RandomForest;
use ndarray::{Array1, Array2};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

fn served_model() -> ServedModel {
    // label follows `holiday`
    let x = Array2::from_shape_fn((60, 2), |(i, j)| if j == 0 { (i % 2) as f64 } else { (i % 7) as f64 / 7.0 });
    let y = Array1::from_iter((0..60).map(|i| (i % 2) as f64));
    let mut forest = RandomForest::new(6).with_max_depth(4);
    forest.fit(&x, &y).unwrap();

    let version = ModelVersion {
        name: "Bike_Demand_Predictor".to_string(),
        version: 3,
        run_id: Some("abc".to_string()),
        source: "/unused".to_string(),
        stage: Stage::Staging,
        created_at: 0,
    };
    ServedModel::new(
        version,
        ModelArtifact::new(vec!["holiday".to_string(), "temp".to_string()], forest),
    )
}

fn test_app(dir: &TempDir, served: Option<ServedModel>) -> (axum::Router, Arc<AppState>) {
    let audit = AuditLog::open(dir.path().join("audit.log")).unwrap();
    let state = Arc::new(AppState::new(served, "Bike_Demand_Predictor", Stage::Staging, audit));
    (create_router(state.clone()), state)
}

async fn post_predict(app: axum::Router, body: &str) -> (StatusCode, PredictResponse) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/predict")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn get_health(app: axum::Router) -> (StatusCode, HealthResponse) {
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn audit_lines(dir: &TempDir) -> Vec<Value> {
    std::fs::read_to_string(dir.path().join("audit.log"))
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn test_health_without_model() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = test_app(&dir, None);
    let (status, health) = get_health(app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health.status, "healthy");
    assert!(!health.model_loaded);
}

#[tokio::test]
async fn test_health_with_model() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = test_app(&dir, Some(served_model()));
    let (status, health) = get_health(app).await;
    assert_eq!(status, StatusCode::OK);
    assert!(health.model_loaded);
}

#[tokio::test]
async fn test_predict_without_model_fails_softly() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = test_app(&dir, None);

    let (status, reply) = post_predict(app, r#"{"holiday": 1, "temp": 0.4}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply.status, "failed");
    assert_eq!(reply.prediction, None);
    assert_eq!(reply.error_kind.as_deref(), Some("model_unavailable"));
    assert_eq!(reply.model_version, "Staging");
    assert!(reply.error.is_some());

    let lines = audit_lines(&dir);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["kind"], "request");
    assert_eq!(lines[0]["payload"]["holiday"], 1);
    assert_eq!(lines[1]["kind"], "response");
    assert_eq!(lines[1]["payload"]["status"], "failed");
}

#[tokio::test]
async fn test_predict_success() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = test_app(&dir, Some(served_model()));

    let (status, reply) = post_predict(app, r#"{"holiday": 1, "temp": 0.4}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply.status, "success");
    let label = reply.prediction.unwrap();
    assert!(label == 0 || label == 1);
    let probability = reply.probability.unwrap();
    assert!((0.0..=1.0).contains(&probability));
    assert_eq!(reply.model_version, "Staging");
    assert!(reply.error.is_none());
}

#[tokio::test]
async fn test_predict_reports_inference_failures() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = test_app(&dir, Some(served_model()));

    let (_, missing) = post_predict(app.clone(), r#"{"holiday": 1}"#).await;
    assert_eq!(missing.status, "failed");
    assert_eq!(missing.error_kind.as_deref(), Some("inference_failed"));

    let (_, not_json) = post_predict(app.clone(), "holiday=1").await;
    assert_eq!(not_json.error_kind.as_deref(), Some("inference_failed"));

    let (_, not_object) = post_predict(app, "[1, 0.4]").await;
    assert_eq!(not_object.error_kind.as_deref(), Some("inference_failed"));

    // raw bodies that are not JSON are still audited
    let lines = audit_lines(&dir);
    assert_eq!(lines.len(), 6);
    assert_eq!(lines[2]["payload"], json!("holiday=1"));
    assert!(AuditLog::verify(state.audit.path()).unwrap().valid);
}

#[tokio::test]
async fn test_audit_chain_spans_requests() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = test_app(&dir, Some(served_model()));

    for _ in 0..3 {
        post_predict(app.clone(), r#"{"holiday": 0, "temp": 0.2}"#).await;
    }

    let check = AuditLog::verify(state.audit.path()).unwrap();
    assert!(check.valid);
    assert_eq!(check.entries, 6);

    let entry = state.audit.record(AuditKind::Request, json!({})).unwrap();
    assert_eq!(entry.seq, 6);
}

#[test]
fn test_audit_log_with_soft_vote_probabilities_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.log");

    {
        let log = AuditLog::open(&path).unwrap();
        // averaged tree votes rarely have short exact decimal forms
        for votes in 0..=80 {
            let probability = votes as f64 / 80.0 * 0.7 + 0.1;
            log.record(
                AuditKind::Response,
                json!({"status": "success", "prediction": 1, "probability": probability}),
            )
            .unwrap();
        }
    }

    let check = AuditLog::verify(&path).unwrap();
    assert!(check.valid, "{}", check.message);
    assert_eq!(check.entries, 81);

    // resuming keeps the chain intact
    let log = AuditLog::open(&path).unwrap();
    let entry = log
        .record(AuditKind::Response, json!({"probability": 36.0 / 80.0 * 0.7 + 0.1}))
        .unwrap();
    assert_eq!(entry.seq, 81);
    let check = AuditLog::verify(&path).unwrap();
    assert!(check.valid, "{}", check.message);
    assert_eq!(check.entries, 82);
}

#[tokio::test]
async fn test_served_probabilities_keep_audit_chain_valid() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = test_app(&dir, Some(served_model()));

    for i in 0..20 {
        let body = json!({"holiday": i % 2, "temp": i as f64 / 7.0 * 0.3}).to_string();
        post_predict(app.clone(), &body).await;
    }

    let check = AuditLog::verify(state.audit.path()).unwrap();
    assert!(check.valid, "{}", check.message);
    assert_eq!(check.entries, 40);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = test_app(&dir, None);
    let response = app
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
