use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use crash_engine::types::{Decision, Transaction};
use serde::{Deserialize, Serialize};

use crate::{AppState, middleware::AdminAuth, routes::error_response, service};

// Pending book response
#[derive(Serialize)]
pub struct PendingResponse {
    pub transactions: Vec<Transaction>,
}

pub async fn get_pending(_: AdminAuth, State(state): State<AppState>) -> Json<PendingResponse> {
    Json(PendingResponse {
        transactions: service::pending_transactions(&state),
    })
}

// Resolve request
#[derive(Deserialize)]
pub struct ResolveRequest {
    pub decision: Decision,
}

// Resolve response
#[derive(Serialize)]
pub struct ResolveResponse {
    pub success: bool,
    pub transaction: Transaction,
    pub balance: Option<f64>,
}

pub async fn resolve_transaction(
    _: AdminAuth,
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(payload): Json<ResolveRequest>,
) -> Response {
    match service::resolve_transaction(&state, id, payload.decision).await {
        Ok(resolution) => Json(ResolveResponse {
            success: true,
            transaction: resolution.transaction,
            balance: resolution.balance,
        })
        .into_response(),
        Err(err) => error_response(&err).into_response(),
    }
}

// Override request
#[derive(Deserialize)]
pub struct OverrideRequest {
    pub value: f64,
}

// Override response
#[derive(Serialize)]
pub struct OverrideResponse {
    pub success: bool,
    pub value: f64,
}

pub async fn set_override(
    _: AdminAuth,
    State(state): State<AppState>,
    Json(payload): Json<OverrideRequest>,
) -> Response {
    match service::set_override(&state, payload.value) {
        Ok(()) => Json(OverrideResponse {
            success: true,
            value: payload.value,
        })
        .into_response(),
        Err(err) => error_response(&err).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::Database;
    use axum::http::StatusCode;

    fn setup_state() -> AppState {
        AppState::new(Config::default(), Database::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_resolve_twice_conflicts() {
        let state = setup_state();
        service::login(&state, "alice").await.unwrap();
        let (withdraw, _) = service::request_withdraw(&state, "alice", 50.0, "alice@upi")
            .await
            .unwrap();

        let first = resolve_transaction(
            AdminAuth,
            State(state.clone()),
            Path(withdraw.id),
            Json(ResolveRequest {
                decision: Decision::Reject,
            }),
        )
        .await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(state.engine().ledger().balance("alice"), Ok(50.0));

        let second = resolve_transaction(
            AdminAuth,
            State(state.clone()),
            Path(withdraw.id),
            Json(ResolveRequest {
                decision: Decision::Approve,
            }),
        )
        .await;
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert_eq!(state.engine().ledger().balance("alice"), Ok(50.0));

        let unknown = resolve_transaction(
            AdminAuth,
            State(state),
            Path(404),
            Json(ResolveRequest {
                decision: Decision::Approve,
            }),
        )
        .await;
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_override_validation() {
        let state = setup_state();

        let accepted = set_override(
            AdminAuth,
            State(state.clone()),
            Json(OverrideRequest { value: 7.77 }),
        )
        .await;
        assert_eq!(accepted.status(), StatusCode::OK);

        let rejected = set_override(
            AdminAuth,
            State(state.clone()),
            Json(OverrideRequest { value: 0.5 }),
        )
        .await;
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.engine().scheduler().pending_override(), Some(7.77));

        let Json(pending) = get_pending(AdminAuth, State(state)).await;
        assert!(pending.transactions.is_empty());
    }
}
