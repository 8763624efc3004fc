use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use crash_engine::types::{Account, Transaction};
use serde::{Deserialize, Serialize};

use crate::{AppState, routes::error_response, service};

// Login request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
}

// Login response
#[derive(Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    pub account: Option<Account>,
}

// Login endpoint, registers unknown usernames with the signup bonus
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> (StatusCode, Json<LoginResponse>) {
    match service::login(&state, &payload.username).await {
        Ok(account) => {
            let response = LoginResponse {
                success: true,
                message: "Login successful".to_string(),
                account: Some(account),
            };
            (StatusCode::OK, Json(response))
        }
        Err(err) => {
            let (status, Json(body)) = error_response(&err);
            let response = LoginResponse {
                success: false,
                message: body.message,
                account: None,
            };
            (status, Json(response))
        }
    }
}

// Transaction history response
#[derive(Serialize)]
pub struct TransactionsResponse {
    pub username: String,
    pub transactions: Vec<Transaction>,
}

pub async fn get_transactions(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Response {
    match service::user_history(&state, &username).await {
        Ok(transactions) => Json(TransactionsResponse {
            username,
            transactions,
        })
        .into_response(),
        Err(err) => error_response(&err).into_response(),
    }
}
