use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::{Error, Result};
use crate::generator::{CrashPointGenerator, DEFAULT_INSTANT_PROBABILITY};
use crate::history::{HistoryBuffer, MAX_HISTORY_CAP};
use crate::ledger::{Ledger, Resolution};
use crate::round::{PhaseTimer, RoundConfig, RoundScheduler, TickOutcome};
use crate::types::{
    Account, Decision, GameEvent, HistoryEntry, Phase, RoundSnapshot, Transaction,
    get_current_timestamp,
};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub round: RoundConfig,
    /// House-edge probability of an instant 1.00 crash
    pub instant_probability: f64,
    pub history_cap: usize,
    /// Balance credited to a freshly registered account
    pub signup_bonus: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            round: RoundConfig::default(),
            instant_probability: DEFAULT_INSTANT_PROBABILITY,
            history_cap: MAX_HISTORY_CAP,
            signup_bonus: 50.0,
        }
    }
}

/// The single owner of all game state: the round, the ledger and the crash
/// history.
///
/// Callers serialize access (one `&mut` at a time), so a phase read and the
/// balance change that depends on it always happen in the same call.
pub struct CrashEngine {
    scheduler: RoundScheduler,
    ledger: Ledger,
    history: HistoryBuffer,
    signup_bonus: f64,
    rng: StdRng,
}

impl CrashEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_seed(config: EngineConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: EngineConfig, rng: StdRng) -> Self {
        CrashEngine {
            scheduler: RoundScheduler::new(
                config.round.clamped(),
                CrashPointGenerator::new(config.instant_probability),
            ),
            ledger: Ledger::new(),
            history: HistoryBuffer::new(config.history_cap),
            signup_bonus: config.signup_bonus.max(0.0),
            rng,
        }
    }

    /// Seeds state read back from durable storage before the first round.
    pub fn restore(
        &mut self,
        history_newest_first: Vec<HistoryEntry>,
        pending: Vec<Transaction>,
        next_transaction_id: u64,
    ) {
        self.history.restore(history_newest_first);
        self.ledger = Ledger::with_next_transaction_id(next_transaction_id);
        for transaction in pending {
            self.ledger.restore_pending(transaction);
        }
    }

    pub fn start(&mut self) -> (PhaseTimer, Vec<GameEvent>) {
        self.scheduler.start()
    }

    /// Feeds a timer firing into the round. On a crash the result is also
    /// recorded in the history and a `HistoryUpdate` follows the `Crash`.
    pub fn on_timer(&mut self, timer: &PhaseTimer) -> TickOutcome {
        let outcome = self.scheduler.on_timer(timer, &mut self.rng);

        let Some(multiplier) = outcome.crashed_at() else {
            return outcome;
        };

        self.history.push(HistoryEntry {
            multiplier,
            timestamp: get_current_timestamp(),
        });
        let update = GameEvent::HistoryUpdate {
            sequence: self.history.multipliers(),
        };

        match outcome {
            TickOutcome::Transition { mut events, timer } => {
                events.push(update);
                TickOutcome::Transition { events, timer }
            }
            TickOutcome::Continue(mut events) => {
                events.push(update);
                TickOutcome::Continue(events)
            }
            TickOutcome::Stale => TickOutcome::Stale,
        }
    }

    pub fn phase(&self) -> Phase {
        self.scheduler.phase()
    }

    pub fn snapshot(&self) -> RoundSnapshot {
        self.scheduler.snapshot()
    }

    pub fn scheduler(&self) -> &RoundScheduler {
        &self.scheduler
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn load_account(&mut self, account: Account) -> Account {
        self.ledger.load_account(account).clone()
    }

    pub fn register(&mut self, username: &str) -> Result<Account> {
        self.ledger
            .register(username, self.signup_bonus, get_current_timestamp())
    }

    pub fn round_id(&self) -> u64 {
        self.scheduler.round_id()
    }

    /// Debits a bet for round `round_id`, which must still be the open round.
    pub fn place_bet(&mut self, username: &str, amount: f64, round_id: u64) -> Result<f64> {
        self.require_round(round_id)?;
        let phase = self.scheduler.phase();
        self.ledger.place_bet(phase, username, amount)
    }

    /// Credits a cashout for round `round_id`; refused once that round has
    /// crashed, even if a later round is already flying.
    pub fn cash_out(&mut self, username: &str, win_amount: f64, round_id: u64) -> Result<f64> {
        self.require_round(round_id)?;
        let phase = self.scheduler.phase();
        self.ledger.cash_out(phase, username, win_amount)
    }

    pub fn request_deposit(
        &mut self,
        username: &str,
        amount: f64,
        external_ref: &str,
    ) -> Result<Transaction> {
        self.ledger
            .request_deposit(username, amount, external_ref, get_current_timestamp())
    }

    pub fn request_withdraw(
        &mut self,
        username: &str,
        amount: f64,
        external_ref: &str,
    ) -> Result<(Transaction, f64)> {
        self.ledger
            .request_withdraw(username, amount, external_ref, get_current_timestamp())
    }

    pub fn restore_pending(&mut self, transaction: Transaction) {
        self.ledger.restore_pending(transaction);
    }

    /// Admin: one-shot crash point for the next launch
    pub fn set_override(&mut self, value: f64) -> Result<()> {
        self.scheduler.set_override(value)
    }

    /// Admin: resolves a pending transaction. The returned event is the
    /// forced balance sync for the affected account, if it is known.
    pub fn resolve_transaction(
        &mut self,
        id: u64,
        decision: Decision,
    ) -> Result<(Resolution, Option<GameEvent>)> {
        let resolution = self.ledger.resolve(id, decision)?;
        let event = resolution.balance.map(|balance| GameEvent::ForceBalance {
            username: resolution.transaction.username.clone(),
            balance,
        });
        Ok((resolution, event))
    }

    fn require_round(&self, requested: u64) -> Result<()> {
        let current = self.scheduler.round_id();
        if requested != current {
            return Err(Error::RoundChanged { requested, current });
        }
        Ok(())
    }
}
