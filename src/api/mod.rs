pub mod dto;
pub mod errors;
pub mod handlers;

use std::sync::Arc;

use axum::{routing::get, Router};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use handlers::ApiDoc;

use crate::{
    actuation::ActuationPublisher,
    realtime::{ws, Broadcaster, ProfileDirectory},
    store::ReadingStore,
};

/// Shared handles for HTTP and WebSocket handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ReadingStore>,
    pub broadcaster: Broadcaster,
    pub directory: Arc<dyn ProfileDirectory>,
    pub publisher: Arc<dyn ActuationPublisher>,
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/api/sensor-data/history", get(handlers::get_history))
        .route(
            "/api/sensor-data/history/period",
            get(handlers::get_history_period),
        )
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .split_for_parts();

    router
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}
