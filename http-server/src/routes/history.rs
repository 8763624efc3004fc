use axum::{Json, extract::State};
use crash_engine::types::RoundSnapshot;
use serde::Serialize;

use crate::{AppState, service};

// Recent crash multipliers, newest first
#[derive(Serialize)]
pub struct HistoryResponse {
    pub sequence: Vec<f64>,
}

pub async fn get_history(State(state): State<AppState>) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        sequence: service::crash_history(&state),
    })
}

pub async fn get_round(State(state): State<AppState>) -> Json<RoundSnapshot> {
    Json(service::snapshot(&state))
}
