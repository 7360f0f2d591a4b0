pub mod queue;

use axum::routing::{get, post};
use axum::Router;

use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/api/v1/queue/run", post(queue::run))
        .route("/api/v1/queue/stats", get(queue::stats))
}
