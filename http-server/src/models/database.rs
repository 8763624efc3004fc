use crash_engine::types::{
    Account, HistoryEntry, Transaction, TransactionKind, TransactionStatus,
};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::StoreError;

/// SQLite-backed durable store for accounts, transactions and crash history.
///
/// Every call runs on the blocking pool, so each `.await` on it is a
/// suspension point for the caller.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        let result = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&conn)
        })
        .await?;
        Ok(result?)
    }

    // Accounts

    /// Holds the connection so every store call queues behind the caller
    #[cfg(test)]
    pub(crate) fn hold_connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn find_account(&self, username: &str) -> Result<Option<Account>, StoreError> {
        let username = username.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT username, balance, created_at, revision FROM accounts WHERE username = ?1",
                params![username],
                account_from_row,
            )
            .optional()
        })
        .await
    }

    /// Inserts the account or updates its balance. Writes can reach the
    /// store out of order, so a copy older than the stored revision is
    /// dropped. Returns whether the row changed.
    pub async fn save_account(&self, account: &Account) -> Result<bool, StoreError> {
        let account = account.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO accounts (username, balance, created_at, revision)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (username) DO UPDATE
                 SET balance = excluded.balance, revision = excluded.revision
                 WHERE excluded.revision > accounts.revision",
                params![
                    account.username,
                    account.balance,
                    account.created_at as i64,
                    account.revision as i64,
                ],
            )
            .map(|changed| changed > 0)
        })
        .await
    }

    // Transactions

    pub async fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        let tx = transaction.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO transactions (id, username, kind, amount, external_ref, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    tx.id as i64,
                    tx.username,
                    tx.kind.as_str(),
                    tx.amount,
                    tx.external_ref,
                    tx.status.as_str(),
                    tx.created_at as i64,
                ],
            )
            .map(|_| ())
        })
        .await
    }

    pub async fn update_transaction_status(
        &self,
        id: u64,
        status: TransactionStatus,
    ) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE transactions SET status = ?2 WHERE id = ?1",
                params![id as i64, status.as_str()],
            )
            .map(|_| ())
        })
        .await
    }

    pub async fn find_transaction(&self, id: u64) -> Result<Option<Transaction>, StoreError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, username, kind, amount, external_ref, status, created_at
                 FROM transactions WHERE id = ?1",
                params![id as i64],
                transaction_from_row,
            )
            .optional()
        })
        .await
    }

    pub async fn find_transactions_by_status(
        &self,
        status: TransactionStatus,
    ) -> Result<Vec<Transaction>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, kind, amount, external_ref, status, created_at
                 FROM transactions WHERE status = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![status.as_str()], transaction_from_row)?;
            rows.collect()
        })
        .await
    }

    /// A user's most recent transactions, newest first
    pub async fn find_transactions_by_user(
        &self,
        username: &str,
        limit: usize,
    ) -> Result<Vec<Transaction>, StoreError> {
        let username = username.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, kind, amount, external_ref, status, created_at
                 FROM transactions WHERE username = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![username, limit as i64], transaction_from_row)?;
            rows.collect()
        })
        .await
    }

    /// First id not yet used by any stored transaction
    pub async fn next_transaction_id(&self) -> Result<u64, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(MAX(id), 0) + 1 FROM transactions",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|id| id as u64)
        })
        .await
    }

    // History

    pub async fn insert_history(&self, entry: HistoryEntry) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO history (multiplier, created_at) VALUES (?1, ?2)",
                params![entry.multiplier, entry.timestamp as i64],
            )
            .map(|_| ())
        })
        .await
    }

    /// The `limit` most recent crashes, newest first
    pub async fn recent_history(&self, limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT multiplier, created_at FROM history ORDER BY created_at DESC, id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                Ok(HistoryEntry {
                    multiplier: row.get(0)?,
                    timestamp: row.get::<_, i64>(1)? as u64,
                })
            })?;
            rows.collect()
        })
        .await
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         CREATE TABLE IF NOT EXISTS accounts (
             username TEXT PRIMARY KEY,
             balance REAL NOT NULL,
             created_at INTEGER NOT NULL,
             revision INTEGER NOT NULL DEFAULT 0
         );
         CREATE TABLE IF NOT EXISTS transactions (
             id INTEGER PRIMARY KEY,
             username TEXT NOT NULL,
             kind TEXT NOT NULL,
             amount REAL NOT NULL,
             external_ref TEXT NOT NULL,
             status TEXT NOT NULL,
             created_at INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS transactions_status ON transactions (status);
         CREATE INDEX IF NOT EXISTS transactions_username ON transactions (username, created_at);
         CREATE TABLE IF NOT EXISTS history (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             multiplier REAL NOT NULL,
             created_at INTEGER NOT NULL
         );",
    )
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        username: row.get(0)?,
        balance: row.get(1)?,
        created_at: row.get::<_, i64>(2)? as u64,
        revision: row.get::<_, i64>(3)? as u64,
    })
}

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let kind: String = row.get(2)?;
    let status: String = row.get(5)?;
    Ok(Transaction {
        id: row.get::<_, i64>(0)? as u64,
        username: row.get(1)?,
        kind: TransactionKind::parse(&kind)
            .ok_or_else(|| conversion_error(2, format!("unknown transaction kind '{kind}'")))?,
        amount: row.get(3)?,
        external_ref: row.get(4)?,
        status: TransactionStatus::parse(&status)
            .ok_or_else(|| conversion_error(5, format!("unknown transaction status '{status}'")))?,
        created_at: row.get::<_, i64>(6)? as u64,
    })
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transaction(id: u64, username: &str, status: TransactionStatus, created_at: u64) -> Transaction {
        Transaction {
            id,
            username: username.to_string(),
            kind: TransactionKind::Withdraw,
            amount: 12.5,
            external_ref: "user@upi".to_string(),
            status,
            created_at,
        }
    }

    fn account(balance: f64, revision: u64) -> Account {
        Account {
            username: "alice".to_string(),
            balance,
            created_at: 1_000,
            revision,
        }
    }

    #[tokio::test]
    async fn test_account_save_and_find() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.find_account("alice").await.unwrap().is_none());

        assert!(db.save_account(&account(50.0, 0)).await.unwrap());
        assert!(db.save_account(&account(12.25, 1)).await.unwrap());

        let stored = db.find_account("alice").await.unwrap().unwrap();
        assert_eq!(stored.balance, 12.25);
        assert_eq!(stored.created_at, 1_000);
        assert_eq!(stored.revision, 1);
    }

    #[tokio::test]
    async fn test_out_of_order_balance_write_dropped() {
        let db = Database::open_in_memory().unwrap();
        db.save_account(&account(50.0, 0)).await.unwrap();

        // the later change lands first, the earlier one must not undo it
        assert!(db.save_account(&account(60.0, 2)).await.unwrap());
        assert!(!db.save_account(&account(40.0, 1)).await.unwrap());
        assert!(!db.save_account(&account(50.0, 0)).await.unwrap());

        let stored = db.find_account("alice").await.unwrap().unwrap();
        assert_eq!(stored.balance, 60.0);
        assert_eq!(stored.revision, 2);
    }

    #[tokio::test]
    async fn test_transactions_by_status_and_user() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.next_transaction_id().await.unwrap(), 1);

        db.insert_transaction(&transaction(1, "alice", TransactionStatus::Pending, 10))
            .await
            .unwrap();
        db.insert_transaction(&transaction(2, "bob", TransactionStatus::Pending, 20))
            .await
            .unwrap();
        db.insert_transaction(&transaction(3, "alice", TransactionStatus::Pending, 30))
            .await
            .unwrap();
        db.update_transaction_status(2, TransactionStatus::Approved)
            .await
            .unwrap();

        let pending = db
            .find_transactions_by_status(TransactionStatus::Pending)
            .await
            .unwrap();
        assert_eq!(pending.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 3]);

        let alice = db.find_transactions_by_user("alice", 15).await.unwrap();
        assert_eq!(alice.iter().map(|t| t.id).collect::<Vec<_>>(), vec![3, 1]);
        assert_eq!(db.find_transactions_by_user("alice", 1).await.unwrap().len(), 1);

        let bob = db.find_transaction(2).await.unwrap().unwrap();
        assert_eq!(bob.status, TransactionStatus::Approved);
        assert_eq!(bob.kind, TransactionKind::Withdraw);
        assert!(db.find_transaction(99).await.unwrap().is_none());
        assert_eq!(db.next_transaction_id().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_recent_history_newest_first() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..30u64 {
            db.insert_history(HistoryEntry {
                multiplier: 1.0 + i as f64,
                timestamp: 1_000 + i,
            })
            .await
            .unwrap();
        }

        let recent = db.recent_history(25).await.unwrap();
        assert_eq!(recent.len(), 25);
        assert_eq!(recent[0].multiplier, 30.0);
        assert_eq!(recent[24].multiplier, 6.0);
    }
}
