use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Phase of the single shared round.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    /// Open for bets, counting down to launch
    Idle,
    /// Multiplier climbing, cashouts allowed
    Flying,
    /// Crash point reached, cooling down before the next round
    Crashed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "IDLE",
            Phase::Flying => "FLYING",
            Phase::Crashed => "CRASHED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub balance: f64,
    /// Milliseconds since the unix epoch
    pub created_at: u64,
    /// Bumped on every balance change; orders writes to the store
    #[serde(skip)]
    pub revision: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "DEPOSIT",
            TransactionKind::Withdraw => "WITHDRAW",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DEPOSIT" => Some(TransactionKind::Deposit),
            "WITHDRAW" => Some(TransactionKind::Withdraw),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Pending,
    Approved,
    Rejected,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Approved => "APPROVED",
            TransactionStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(TransactionStatus::Pending),
            "APPROVED" => Some(TransactionStatus::Approved),
            "REJECTED" => Some(TransactionStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

/// Admin verdict on a pending transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    /// Terminal status a transaction lands in after this decision
    pub fn status(&self) -> TransactionStatus {
        match self {
            Decision::Approve => TransactionStatus::Approved,
            Decision::Reject => TransactionStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: u64,
    pub username: String,
    pub kind: TransactionKind,
    pub amount: f64,
    /// Free-text settlement reference (UTR, UPI id, ...)
    pub external_ref: String,
    pub status: TransactionStatus,
    pub created_at: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub multiplier: f64,
    pub timestamp: u64,
}

/// Events fanned out to every connected client.
///
/// The crash point never appears in any of these before the `Crash` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum GameEvent {
    StateChange {
        phase: Phase,
        #[serde(skip_serializing_if = "Option::is_none")]
        countdown: Option<u32>,
    },
    TimerUpdate {
        countdown: u32,
    },
    Tick {
        multiplier: f64,
    },
    Crash {
        multiplier: f64,
    },
    HistoryUpdate {
        sequence: Vec<f64>,
    },
    ForceBalance {
        username: String,
        balance: f64,
    },
}

/// Public view of the round, safe to hand to clients.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub round_id: u64,
    pub phase: Phase,
    pub multiplier: f64,
    pub countdown: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
}

#[inline(always)]
pub fn get_current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
