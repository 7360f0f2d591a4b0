use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::auth::extractor::TriggerAuth;
use crate::error::AppError;
use crate::models::QueueStats;
use crate::state::SharedState;

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub success: bool,
    pub processed: usize,
    pub failed: usize,
    pub total: usize,
    pub skipped: usize,
}

pub async fn run(
    _auth: TriggerAuth,
    State(state): State<SharedState>,
) -> Result<Json<RunResponse>, AppError> {
    let report = state.runner.try_run_batch().await?;

    Ok(Json(RunResponse {
        success: true,
        processed: report.processed,
        failed: report.failed,
        total: report.total,
        skipped: report.skipped,
    }))
}

pub async fn stats(
    _auth: TriggerAuth,
    State(state): State<SharedState>,
) -> Result<Json<QueueStats>, AppError> {
    let stats = state.runner.store().stats(Utc::now()).await?;
    Ok(Json(stats))
}
