//! API route handlers.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::debug;

use flowgate_picker::PickRequest;
use flowgate_state::{RolloutConfiguration, RolloutState};

use crate::ApiState;
use crate::error::ApiError;

/// Standard API response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        })
    }
}

/// Body of a manual transition request.
#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub state: RolloutState,
}

/// Run `work` under the request timeout. `work` receives the same bound as
/// a store deadline so a late transaction aborts instead of committing.
///
/// Only the part of a request up to its commit belongs in `work`: once a
/// transaction committed, the request must not report a timeout.
async fn bounded<T, F>(timeout: Duration, work: impl FnOnce(Instant) -> F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    let deadline = Instant::now() + timeout;
    match tokio::time::timeout(timeout, work(deadline)).await {
        Ok(result) => result,
        Err(_) => {
            debug!(timeout_ms = timeout.as_millis() as u64, "request timed out");
            Err(ApiError::timeout())
        }
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::new("invalid-request", rejection.body_text()))
}

// ── Picker ─────────────────────────────────────────────────────

/// POST /api/v1/picker
pub async fn pick(
    State(state): State<ApiState>,
    payload: Result<Json<PickRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body(payload)?;
    let picker = Arc::clone(&state.picker);
    let committed = bounded(state.request_timeout, |deadline| async move {
        Ok::<_, ApiError>(picker.commit(&request, Some(deadline))?)
    })
    .await?;
    let result = state.picker.publish(committed).await;
    Ok(ApiResponse::ok(result))
}

// ── Rollout ────────────────────────────────────────────────────

/// GET /api/v1/use-cases/{id}/rollout
pub async fn get_rollout(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let strategy = bounded(state.request_timeout, |_| async move { Ok::<_, ApiError>(state.rollout.strategy(&id)?) }).await?;
    Ok(ApiResponse::ok(strategy))
}

/// PUT /api/v1/use-cases/{id}/rollout/configuration
pub async fn update_configuration(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    payload: Result<Json<RolloutConfiguration>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let configuration = body(payload)?;
    let strategy = bounded(state.request_timeout, |deadline| async move {
        Ok::<_, ApiError>(state
            .rollout
            .update_configuration(&id, configuration, Some(deadline))
            .await?)
    })
    .await?;
    Ok(ApiResponse::ok(strategy))
}

/// POST /api/v1/use-cases/{id}/rollout/transition
pub async fn transition(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    payload: Result<Json<TransitionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body(payload)?;
    let strategy = bounded(state.request_timeout, |deadline| async move {
        Ok::<_, ApiError>(state.rollout.transition(&id, request.state, Some(deadline)).await?)
    })
    .await?;
    Ok(ApiResponse::ok(strategy))
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok(serde_json::json!({ "status": "ok" }))
}
