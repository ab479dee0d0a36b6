//! flowgate-api: REST API for Flowgate.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/picker` | Pick a flow for a correlation |
//! | GET | `/api/v1/use-cases/{id}/rollout` | Current rollout strategy |
//! | PUT | `/api/v1/use-cases/{id}/rollout/configuration` | Replace the configuration (INIT only) |
//! | POST | `/api/v1/use-cases/{id}/rollout/transition` | Manual state transition |
//! | GET | `/healthz` | Liveness |

pub mod error;
pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post, put};

use flowgate_picker::Picker;
use flowgate_rollout::RolloutController;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub picker: Arc<Picker>,
    pub rollout: Arc<RolloutController>,
    /// Upper bound on every request, also handed to the store.
    pub request_timeout: Duration,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/picker", post(handlers::pick))
        .route("/use-cases/{id}/rollout", get(handlers::get_rollout))
        .route(
            "/use-cases/{id}/rollout/configuration",
            put(handlers::update_configuration),
        )
        .route("/use-cases/{id}/rollout/transition", post(handlers::transition))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
