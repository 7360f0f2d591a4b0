use std::sync::Arc;

use crate::config::Config;
use crate::worker::QueueRunner;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Config,
    pub runner: Arc<QueueRunner>,
}
