use axum::http::StatusCode;

/// Failure of the durable store. Never fatal to the round.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Engine(#[from] crash_engine::Error),

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("admin token missing or invalid")]
    Unauthorized,
}

impl ServiceError {
    /// Stable code sent to clients alongside the message
    pub fn code(&self) -> &'static str {
        use crash_engine::Error as E;
        match self {
            ServiceError::Engine(E::InvalidState { .. } | E::RoundChanged { .. }) => {
                "INVALID_STATE"
            }
            ServiceError::Engine(E::InsufficientBalance { .. }) => "INSUFFICIENT_BALANCE",
            ServiceError::Engine(E::AccountNotFound(_) | E::TransactionNotFound(_)) => "NOT_FOUND",
            ServiceError::Engine(E::AlreadyResolved(_)) => "ALREADY_RESOLVED",
            ServiceError::Engine(
                E::InvalidAmount(_) | E::InvalidOverride(_) | E::AccountExists(_),
            ) => "INVALID_REQUEST",
            ServiceError::Persistence(_) => "PERSISTENCE_FAILURE",
            ServiceError::InvalidRequest(_) => "INVALID_REQUEST",
            ServiceError::Unauthorized => "UNAUTHORIZED",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.code() {
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "INVALID_STATE" | "ALREADY_RESOLVED" => StatusCode::CONFLICT,
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "PERSISTENCE_FAILURE" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Races and double submissions are expected traffic, not worth a warning
    pub fn is_quiet(&self) -> bool {
        matches!(
            self,
            ServiceError::Engine(crash_engine::Error::InvalidState { .. })
                | ServiceError::Engine(crash_engine::Error::RoundChanged { .. })
                | ServiceError::Engine(crash_engine::Error::AlreadyResolved(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crash_engine::types::Phase;

    #[test]
    fn test_error_codes() {
        let stale = ServiceError::from(crash_engine::Error::InvalidState {
            expected: Phase::Flying,
            actual: Phase::Crashed,
        });
        assert_eq!(stale.code(), "INVALID_STATE");
        assert_eq!(stale.status(), StatusCode::CONFLICT);
        assert!(stale.is_quiet());

        let missing = ServiceError::from(crash_engine::Error::TransactionNotFound(4));
        assert_eq!(missing.code(), "NOT_FOUND");
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert!(!missing.is_quiet());

        let late = ServiceError::from(crash_engine::Error::RoundChanged {
            requested: 1,
            current: 2,
        });
        assert_eq!(late.code(), "INVALID_STATE");
        assert!(late.is_quiet());

        assert_eq!(ServiceError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
    }
}
