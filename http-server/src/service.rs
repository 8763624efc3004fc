//! Request handling shared by the websocket and HTTP surfaces.
//!
//! All game state sits behind one mutex in [`AppState`]. The lock is never
//! held across an `.await`: each store call is a suspension point, and any
//! decision taken before it (round and phase, pending status) is checked
//! again under the lock when the effect is committed.

use crash_engine::CrashEngine;
use crash_engine::ledger::Resolution;
use crash_engine::types::{
    Account, Decision, GameEvent, Phase, RoundSnapshot, Transaction, TransactionStatus,
};
use std::sync::{MutexGuard, PoisonError};
use tracing::{error, info, warn};

use crate::AppState;
use crate::error::ServiceError;

/// Transactions returned by a user history request
pub const USER_HISTORY_LIMIT: usize = 15;
const MAX_USERNAME_LEN: usize = 32;

impl AppState {
    pub fn engine(&self) -> MutexGuard<'_, CrashEngine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fire-and-forget fan-out to every connected client
    pub fn broadcast(&self, event: GameEvent) {
        // no receivers just means nobody is connected
        let _ = self.events.send(event);
    }
}

/// Opens an existing account or registers a new one with the signup bonus.
pub async fn login(state: &AppState, username: &str) -> Result<Account, ServiceError> {
    let username = normalize_username(username)?;

    let cached = state.engine().ledger().account(&username).cloned();
    if let Some(account) = cached {
        return Ok(account);
    }

    if let Some(stored) = state.db.find_account(&username).await? {
        return Ok(state.engine().load_account(stored));
    }

    let registered = state.engine().register(&username);
    let account = match registered {
        Ok(account) => account,
        // registered by a concurrent login while we were waiting on the store
        Err(crash_engine::Error::AccountExists(_)) => {
            let existing = state.engine().ledger().account(&username).cloned();
            return existing.ok_or_else(|| crash_engine::Error::AccountNotFound(username).into());
        }
        Err(err) => return Err(err.into()),
    };

    if let Err(err) = state.db.save_account(&account).await {
        error!(username = %account.username, %err, "failed to persist new account");
    }
    info!(username = %account.username, balance = account.balance, "account registered");
    Ok(account)
}

pub async fn place_bet(state: &AppState, username: &str, amount: f64) -> Result<f64, ServiceError> {
    let username = normalize_username(username)?;
    let round_id = require_phase(state, Phase::Idle)?;
    ensure_account(state, &username).await?;

    // the round may have launched, or been replaced, while the account was loading
    let balance = state.engine().place_bet(&username, amount, round_id)?;
    persist_balance(state, &username).await;
    Ok(balance)
}

pub async fn cash_out(
    state: &AppState,
    username: &str,
    win_amount: f64,
) -> Result<f64, ServiceError> {
    let username = normalize_username(username)?;
    let round_id = require_phase(state, Phase::Flying)?;
    ensure_account(state, &username).await?;

    // committed under the lock: a crash of this round meanwhile rejects it,
    // whatever round is flying by now
    let balance = state.engine().cash_out(&username, win_amount, round_id)?;
    persist_balance(state, &username).await;
    Ok(balance)
}

pub async fn request_deposit(
    state: &AppState,
    username: &str,
    amount: f64,
    external_ref: &str,
) -> Result<Transaction, ServiceError> {
    let username = normalize_username(username)?;
    ensure_account(state, &username).await?;

    let transaction = state
        .engine()
        .request_deposit(&username, amount, external_ref)?;
    if let Err(err) = state.db.insert_transaction(&transaction).await {
        error!(id = transaction.id, %err, "failed to persist deposit request");
    }
    info!(id = transaction.id, %username, amount, "deposit requested");
    Ok(transaction)
}

/// Reserves the funds immediately; returns the request and the new balance.
pub async fn request_withdraw(
    state: &AppState,
    username: &str,
    amount: f64,
    external_ref: &str,
) -> Result<(Transaction, f64), ServiceError> {
    let username = normalize_username(username)?;
    ensure_account(state, &username).await?;

    let (transaction, balance) = state
        .engine()
        .request_withdraw(&username, amount, external_ref)?;
    persist_balance(state, &username).await;
    if let Err(err) = state.db.insert_transaction(&transaction).await {
        error!(id = transaction.id, %err, "failed to persist withdraw request");
    }
    info!(id = transaction.id, %username, amount, "withdraw requested");
    Ok((transaction, balance))
}

/// A user's most recent transactions, newest first
pub async fn user_history(state: &AppState, username: &str) -> Result<Vec<Transaction>, ServiceError> {
    let username = normalize_username(username)?;
    Ok(state
        .db
        .find_transactions_by_user(&username, USER_HISTORY_LIMIT)
        .await?)
}

pub fn pending_transactions(state: &AppState) -> Vec<Transaction> {
    state.engine().ledger().pending()
}

/// Admin: approves or rejects a pending transaction and pushes the owner's
/// new balance to every client.
pub async fn resolve_transaction(
    state: &AppState,
    id: u64,
    decision: Decision,
) -> Result<Resolution, ServiceError> {
    let owner = state
        .engine()
        .ledger()
        .pending_transaction(id)
        .map(|transaction| transaction.username.clone());

    let Some(owner) = owner else {
        // not in the pending book, tell a settled transaction from an unknown one
        return match state.db.find_transaction(id).await? {
            Some(stored) if stored.status.is_terminal() => {
                Err(crash_engine::Error::AlreadyResolved(id).into())
            }
            _ => Err(crash_engine::Error::TransactionNotFound(id).into()),
        };
    };

    // the balance effect needs the owner in memory; a vanished owner still
    // lets the status settle
    match ensure_account(state, &owner).await {
        Ok(()) | Err(ServiceError::Engine(crash_engine::Error::AccountNotFound(_))) => {}
        Err(err) => return Err(err),
    }

    // still pending? another resolution may have landed while we were suspended
    let resolved = state.engine().resolve_transaction(id, decision);
    let (resolution, force_balance) = resolved.map_err(|err| match err {
        crash_engine::Error::TransactionNotFound(id) => crash_engine::Error::AlreadyResolved(id),
        other => other,
    })?;

    if let Err(err) = state
        .db
        .update_transaction_status(id, resolution.transaction.status)
        .await
    {
        error!(id, %err, "failed to persist transaction status");
    }
    if resolution.balance.is_some() {
        persist_balance(state, &owner).await;
    }
    if let Some(event) = force_balance {
        state.broadcast(event);
    }

    info!(
        id,
        username = %owner,
        status = resolution.transaction.status.as_str(),
        "transaction resolved"
    );
    Ok(resolution)
}

/// Admin: fixes the crash point of the next round to launch
pub fn set_override(state: &AppState, value: f64) -> Result<(), ServiceError> {
    state.engine().set_override(value)?;
    warn!(value, "next round crash point fixed by admin");
    Ok(())
}

pub fn authorize_admin(state: &AppState, token: Option<&str>) -> Result<(), ServiceError> {
    match state.config.admin_token.as_deref() {
        Some(expected) if token != Some(expected) => Err(ServiceError::Unauthorized),
        _ => Ok(()),
    }
}

pub fn crash_history(state: &AppState) -> Vec<f64> {
    state.engine().history().multipliers()
}

pub fn snapshot(state: &AppState) -> RoundSnapshot {
    state.engine().snapshot()
}

/// Makes sure the account is held in memory, loading it from the store if
/// needed. This is the suspension point of every ledger operation.
async fn ensure_account(state: &AppState, username: &str) -> Result<(), ServiceError> {
    let cached = state.engine().ledger().contains_account(username);
    if cached {
        return Ok(());
    }

    match state.db.find_account(username).await? {
        Some(stored) => {
            state.engine().load_account(stored);
            Ok(())
        }
        None => Err(crash_engine::Error::AccountNotFound(username.to_string()).into()),
    }
}

/// Fails fast on the wrong phase; returns the round the request belongs to
fn require_phase(state: &AppState, expected: Phase) -> Result<u64, ServiceError> {
    let snapshot = state.engine().snapshot();
    if snapshot.phase != expected {
        return Err(crash_engine::Error::InvalidState {
            expected,
            actual: snapshot.phase,
        }
        .into());
    }
    Ok(snapshot.round_id)
}

/// Writes the current in-memory balance through to the store. The copy
/// carries its revision, so a write that lands late cannot undo a newer one.
async fn persist_balance(state: &AppState, username: &str) {
    let account = state.engine().ledger().account(username).cloned();
    let Some(account) = account else {
        return;
    };
    if let Err(err) = state.db.save_account(&account).await {
        error!(username, %err, "failed to persist balance");
    }
}

fn normalize_username(username: &str) -> Result<String, ServiceError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ServiceError::InvalidRequest("username is required".to_string()));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(ServiceError::InvalidRequest(format!(
            "username longer than {MAX_USERNAME_LEN} characters"
        )));
    }
    Ok(username.to_string())
}
