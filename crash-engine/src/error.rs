use crate::types::Phase;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("operation requires phase {expected}, round is {actual}")]
    InvalidState { expected: Phase, actual: Phase },

    #[error("request made in round {requested}, round {current} is now in play")]
    RoundChanged { requested: u64, current: u64 },

    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: f64, available: f64 },

    #[error("account '{0}' not found")]
    AccountNotFound(String),

    #[error("account '{0}' already exists")]
    AccountExists(String),

    #[error("transaction {0} not found")]
    TransactionNotFound(u64),

    #[error("transaction {0} already resolved")]
    AlreadyResolved(u64),

    #[error("invalid amount {0}")]
    InvalidAmount(f64),

    #[error("invalid crash override {0}, must be a finite value >= 1.00")]
    InvalidOverride(f64),
}
