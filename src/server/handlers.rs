//! Request handlers

use std::sync::Arc;

use axum::{body::Bytes, extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::audit::AuditKind;
use super::state::{AppState, PredictError};

/// Body of every `/predict` reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    /// `success` or `failed`
    pub status: String,
    pub prediction: Option<i64>,
    pub probability: Option<f64>,
    /// Stage of the served model
    pub model_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
}

fn audit(state: &AppState, kind: AuditKind, payload: Value) {
    if let Err(e) = state.audit.record(kind, payload) {
        warn!(error = %e, kind = ?kind, "Failed to write audit entry");
    }
}

pub async fn predict(State(state): State<Arc<AppState>>, body: Bytes) -> Json<PredictResponse> {
    let parsed: Result<Value, _> = serde_json::from_slice(&body);
    let request_payload = match &parsed {
        Ok(value) => value.clone(),
        Err(_) => Value::String(String::from_utf8_lossy(&body).into_owned()),
    };
    audit(&state, AuditKind::Request, request_payload);

    let model_version = state
        .served
        .as_ref()
        .map(|m| m.stage())
        .unwrap_or(state.stage)
        .to_string();

    let outcome = parsed
        .map_err(|e| PredictError::InferenceFailed(format!("invalid JSON body: {}", e)))
        .and_then(|value| state.predict(&value));

    let response = match outcome {
        Ok(prediction) => {
            debug!(label = prediction.label, probability = prediction.probability, "Prediction served");
            PredictResponse {
                status: "success".to_string(),
                prediction: Some(prediction.label),
                probability: Some(prediction.probability),
                model_version,
                error: None,
                error_kind: None,
            }
        }
        Err(e) => {
            warn!(kind = e.kind(), error = %e, "Prediction failed");
            PredictResponse {
                status: "failed".to_string(),
                prediction: None,
                probability: None,
                model_version,
                error: Some(e.to_string()),
                error_kind: Some(e.kind().to_string()),
            }
        }
    };

    match serde_json::to_value(&response) {
        Ok(payload) => audit(&state, AuditKind::Response, payload),
        Err(e) => warn!(error = %e, "Could not serialise response for audit"),
    }

    Json(response)
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        model_loaded: state.model_loaded(),
    })
}
