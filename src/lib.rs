pub mod auth;
pub mod channels;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod state;
pub mod worker;

use std::sync::Arc;

use axum::Router;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::channels::sms::SmsSender;
use crate::channels::whatsapp::WhatsAppSender;
use crate::channels::ChannelRegistry;
use crate::config::Config;
use crate::db::{PgQueueStore, QueueStore};
use crate::state::{AppState, SharedState};
use crate::worker::QueueRunner;

pub fn build_app(pool: PgPool, config: Config) -> (Router, SharedState) {
    let store: Arc<dyn QueueStore> = Arc::new(PgQueueStore::new(pool));
    let channels = default_channels(&config);
    let state = build_state(store, channels, config);
    (router(state.clone()), state)
}

/// Senders for every channel the queue can hold.
pub fn default_channels(config: &Config) -> ChannelRegistry {
    if !config.whatsapp.is_configured() {
        tracing::warn!("WhatsApp credentials not set; WhatsApp deliveries will fail and back off");
    }

    let mut channels = ChannelRegistry::new();
    channels.register(Arc::new(WhatsAppSender::new(config.whatsapp.clone())));
    channels.register(Arc::new(SmsSender));
    channels
}

pub fn build_state(
    store: Arc<dyn QueueStore>,
    channels: ChannelRegistry,
    config: Config,
) -> SharedState {
    let runner = Arc::new(QueueRunner::new(
        store,
        Arc::new(channels),
        config.runner.clone(),
    ));

    Arc::new(AppState { config, runner })
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .merge(routes::api_routes())
        .route("/health", axum::routing::get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
