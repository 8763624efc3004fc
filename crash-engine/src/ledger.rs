use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::generator::round_cents;
use crate::types::{Account, Decision, Phase, Transaction, TransactionKind, TransactionStatus};

/// Outcome of resolving a pending transaction
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub transaction: Transaction,
    /// Balance after the decision was applied, `None` if the account is unknown
    pub balance: Option<f64>,
}

/// Account balances plus the book of pending deposit/withdraw requests.
///
/// Every mutating call is synchronous and validates its precondition (round
/// phase, available balance, pending status) at the moment it commits.
/// Amounts and balances are kept in whole cents.
#[derive(Debug, Clone)]
pub struct Ledger {
    accounts: HashMap<String, Account>,
    /// Only PENDING transactions live here; resolution removes them
    pending: BTreeMap<u64, Transaction>,
    next_transaction_id: u64,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self::with_next_transaction_id(1)
    }

    /// Creates a ledger that continues an id sequence persisted elsewhere
    pub fn with_next_transaction_id(next_transaction_id: u64) -> Self {
        Ledger {
            accounts: HashMap::new(),
            pending: BTreeMap::new(),
            next_transaction_id: next_transaction_id.max(1),
        }
    }

    /// Loads an account that already exists in durable storage. An account
    /// already held in memory wins, since it may carry newer balance changes.
    pub fn load_account(&mut self, account: Account) -> &Account {
        self.accounts
            .entry(account.username.clone())
            .or_insert(account)
    }

    /// Creates a brand new account with a starting balance
    pub fn register(&mut self, username: &str, opening_balance: f64, now: u64) -> Result<Account> {
        if self.accounts.contains_key(username) {
            return Err(Error::AccountExists(username.to_string()));
        }
        let account = Account {
            username: username.to_string(),
            balance: round_cents(opening_balance.max(0.0)),
            created_at: now,
            revision: 0,
        };
        self.accounts.insert(username.to_string(), account.clone());
        Ok(account)
    }

    pub fn account(&self, username: &str) -> Option<&Account> {
        self.accounts.get(username)
    }

    pub fn contains_account(&self, username: &str) -> bool {
        self.accounts.contains_key(username)
    }

    pub fn balance(&self, username: &str) -> Result<f64> {
        self.account(username)
            .map(|account| account.balance)
            .ok_or_else(|| Error::AccountNotFound(username.to_string()))
    }

    /// Debits a bet. Only valid while the round is open for bets.
    pub fn place_bet(&mut self, phase: Phase, username: &str, amount: f64) -> Result<f64> {
        require_phase(Phase::Idle, phase)?;
        let amount = validate_amount(amount)?;
        self.debit(username, amount)
    }

    /// Credits a cashout. Only valid while the round is still flying; a
    /// request that lands after the crash is refused.
    pub fn cash_out(&mut self, phase: Phase, username: &str, win_amount: f64) -> Result<f64> {
        require_phase(Phase::Flying, phase)?;
        let win_amount = validate_amount(win_amount)?;
        self.credit(username, win_amount)
    }

    /// Records a deposit request. No balance effect until approved.
    pub fn request_deposit(
        &mut self,
        username: &str,
        amount: f64,
        external_ref: &str,
        now: u64,
    ) -> Result<Transaction> {
        let amount = validate_amount(amount)?;
        if !self.contains_account(username) {
            return Err(Error::AccountNotFound(username.to_string()));
        }
        Ok(self.open_transaction(username, TransactionKind::Deposit, amount, external_ref, now))
    }

    /// Reserves the withdrawal amount immediately and records the request.
    /// Returns the transaction and the balance after the reservation.
    pub fn request_withdraw(
        &mut self,
        username: &str,
        amount: f64,
        external_ref: &str,
        now: u64,
    ) -> Result<(Transaction, f64)> {
        let amount = validate_amount(amount)?;
        let balance = self.debit(username, amount)?;
        let transaction =
            self.open_transaction(username, TransactionKind::Withdraw, amount, external_ref, now);
        Ok((transaction, balance))
    }

    /// Puts a PENDING transaction read back from storage into the book
    pub fn restore_pending(&mut self, transaction: Transaction) {
        if transaction.status != TransactionStatus::Pending {
            return;
        }
        self.next_transaction_id = self.next_transaction_id.max(transaction.id + 1);
        self.pending.insert(transaction.id, transaction);
    }

    pub fn pending(&self) -> Vec<Transaction> {
        self.pending.values().cloned().collect()
    }

    pub fn pending_transaction(&self, id: u64) -> Option<&Transaction> {
        self.pending.get(&id)
    }

    /// Applies an admin decision to a pending transaction, exactly once.
    ///
    /// | kind     | approve        | reject         |
    /// |----------|----------------|----------------|
    /// | deposit  | credit amount  | no effect      |
    /// | withdraw | no effect      | refund amount  |
    pub fn resolve(&mut self, id: u64, decision: Decision) -> Result<Resolution> {
        let mut transaction = self
            .pending
            .remove(&id)
            .ok_or(Error::TransactionNotFound(id))?;
        transaction.status = decision.status();

        let balance = match (transaction.kind, decision) {
            (TransactionKind::Deposit, Decision::Approve)
            | (TransactionKind::Withdraw, Decision::Reject) => {
                self.credit(&transaction.username, transaction.amount).ok()
            }
            (TransactionKind::Deposit, Decision::Reject)
            | (TransactionKind::Withdraw, Decision::Approve) => {
                self.balance(&transaction.username).ok()
            }
        };

        Ok(Resolution {
            transaction,
            balance,
        })
    }

    pub fn next_transaction_id(&self) -> u64 {
        self.next_transaction_id
    }

    fn open_transaction(
        &mut self,
        username: &str,
        kind: TransactionKind,
        amount: f64,
        external_ref: &str,
        now: u64,
    ) -> Transaction {
        let id = self.next_transaction_id;
        self.next_transaction_id += 1;

        let transaction = Transaction {
            id,
            username: username.to_string(),
            kind,
            amount,
            external_ref: external_ref.to_string(),
            status: TransactionStatus::Pending,
            created_at: now,
        };
        self.pending.insert(id, transaction.clone());
        transaction
    }

    fn debit(&mut self, username: &str, amount: f64) -> Result<f64> {
        let account = self
            .accounts
            .get_mut(username)
            .ok_or_else(|| Error::AccountNotFound(username.to_string()))?;

        if amount > account.balance {
            return Err(Error::InsufficientBalance {
                requested: amount,
                available: account.balance,
            });
        }

        account.balance = round_cents(account.balance - amount);
        account.revision += 1;
        Ok(account.balance)
    }

    fn credit(&mut self, username: &str, amount: f64) -> Result<f64> {
        let account = self
            .accounts
            .get_mut(username)
            .ok_or_else(|| Error::AccountNotFound(username.to_string()))?;
        account.balance = round_cents(account.balance + amount);
        account.revision += 1;
        Ok(account.balance)
    }
}

fn require_phase(expected: Phase, actual: Phase) -> Result<()> {
    if expected != actual {
        return Err(Error::InvalidState { expected, actual });
    }
    Ok(())
}

/// Returns the amount in whole cents; anything below one cent is refused
fn validate_amount(amount: f64) -> Result<f64> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(Error::InvalidAmount(amount));
    }
    let cents = round_cents(amount);
    if cents <= 0.0 {
        return Err(Error::InvalidAmount(amount));
    }
    Ok(cents)
}
