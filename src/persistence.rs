//! Database persistence layer for VanillaChain
//!
//! One SQLite database holds the three tables behind the ledger and the
//! chain: `accounts`, `transactions`, `blocks`. Multi-row mutations (a
//! transfer's debit+credit, a block append with its miner reward) commit as
//! one SQL transaction so a crash or disconnect can never leave a debit
//! without its matching credit.

use crate::amount::Amount;
use crate::block::Block;
use crate::error::{NodeError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::Mutex;

/// Stored account row. Credentials and fingerprints are already hashed by
/// the time they reach the store.
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub username: String,
    pub password_hash: String,
    pub cpu_hash: String,
    pub ram_hash: String,
    pub disk_hash: String,
    pub created: String,
    pub word_hashes: Vec<String>,
    pub balance: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TxStatus::Pending),
            "confirmed" => Ok(TxStatus::Confirmed),
            "failed" => Ok(TxStatus::Failed),
            other => Err(NodeError::Store(format!("Unknown transaction status: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub id: String,
    pub from_username: String,
    pub to_username: String,
    pub amount: Amount,
    pub fee: Amount,
    pub status: TxStatus,
    pub block_id: Option<u64>,
    pub timestamp: String,
}

/// Abstraction over the persistence backend. The ledger and chain own all
/// invariants; the store only offers parameterized CRUD plus composite
/// atomic commits.
pub trait Store: Send + Sync {
    fn account(&self, username: &str) -> Result<Option<AccountRecord>>;
    fn username_taken(&self, username: &str) -> Result<bool>;
    fn insert_account(&self, record: &AccountRecord) -> Result<()>;
    fn balance(&self, username: &str) -> Result<Option<Amount>>;
    /// Overwrite one account's balance. Callers serialize via the ledger lock.
    fn set_balance(&self, username: &str, balance: Amount) -> Result<()>;
    /// Commit a confirmed transfer: the transaction row and both balance
    /// writes land atomically.
    fn apply_transfer(
        &self,
        tx: &TransactionRecord,
        sender_balance: Amount,
        receiver_balance: Amount,
    ) -> Result<()>;
    fn record_transaction(&self, tx: &TransactionRecord) -> Result<()>;
    fn transactions_for(&self, username: &str, limit: usize) -> Result<Vec<TransactionRecord>>;
    fn block_exists(&self, id: u64) -> Result<bool>;
    /// Commit an accepted block and the miner's reward balance atomically.
    fn apply_block(&self, block: &Block, miner_balance: Amount) -> Result<()>;
    fn load_blocks(&self) -> Result<Vec<Block>>;
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| NodeError::Store(format!("Failed to open database: {}", e)))?;
        Self::init_schema(&conn)?;
        Ok(Database { conn: Mutex::new(conn) })
    }

    /// Throwaway database for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| NodeError::Store(format!("Failed to open database: {}", e)))?;
        Self::init_schema(&conn)?;
        Ok(Database { conn: Mutex::new(conn) })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS accounts (
                username TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL,
                cpu_hash TEXT NOT NULL,
                ram_hash TEXT NOT NULL,
                disk_hash TEXT NOT NULL,
                created TEXT NOT NULL,
                word_hashes TEXT NOT NULL,
                balance INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )
        .map_err(|e| NodeError::Store(format!("Failed to create accounts table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                from_username TEXT NOT NULL,
                to_username TEXT NOT NULL,
                amount INTEGER NOT NULL,
                fee INTEGER NOT NULL,
                status TEXT NOT NULL,
                block_id INTEGER,
                timestamp TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| NodeError::Store(format!("Failed to create transactions table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS blocks (
                id INTEGER PRIMARY KEY,
                nonce TEXT NOT NULL,
                previous_hash TEXT NOT NULL,
                miner TEXT NOT NULL,
                payload TEXT NOT NULL,
                hash TEXT NOT NULL,
                difficulty INTEGER NOT NULL,
                accepted_at INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| NodeError::Store(format!("Failed to create blocks table: {}", e)))?;

        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| NodeError::Store("Mutex poisoned".to_string()))
    }

    fn row_to_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransactionRecord> {
        let amount: i64 = row.get(3)?;
        let fee: i64 = row.get(4)?;
        let status: String = row.get(5)?;
        let block_id: Option<i64> = row.get(6)?;
        Ok(TransactionRecord {
            id: row.get(0)?,
            from_username: row.get(1)?,
            to_username: row.get(2)?,
            amount: Amount::from_units(amount as u64),
            fee: Amount::from_units(fee as u64),
            status: TxStatus::parse(&status).map_err(|_| rusqlite::Error::InvalidQuery)?,
            block_id: block_id.map(|id| id as u64),
            timestamp: row.get(7)?,
        })
    }

    fn insert_transaction_row(conn: &Connection, tx: &TransactionRecord) -> Result<()> {
        conn.execute(
            "INSERT INTO transactions (id, from_username, to_username, amount, fee, status, block_id, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                tx.id,
                tx.from_username,
                tx.to_username,
                tx.amount.units() as i64,
                tx.fee.units() as i64,
                tx.status.as_str(),
                tx.block_id.map(|id| id as i64),
                tx.timestamp,
            ],
        )
        .map_err(|e| NodeError::Store(format!("Failed to record transaction: {}", e)))?;
        Ok(())
    }

    fn update_balance_row(conn: &Connection, username: &str, balance: Amount) -> Result<()> {
        let changed = conn
            .execute(
                "UPDATE accounts SET balance = ?1 WHERE username = ?2",
                params![balance.units() as i64, username],
            )
            .map_err(|e| NodeError::Store(format!("Failed to update balance: {}", e)))?;
        if changed == 0 {
            return Err(NodeError::UnknownAccount(username.to_string()));
        }
        Ok(())
    }
}

impl Store for Database {
    fn account(&self, username: &str) -> Result<Option<AccountRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT username, password_hash, cpu_hash, ram_hash, disk_hash, created, word_hashes, balance
                 FROM accounts WHERE username = ?1",
                params![username],
                |row| {
                    let word_json: String = row.get(6)?;
                    let balance: i64 = row.get(7)?;
                    let word_hashes: Vec<String> = serde_json::from_str(&word_json)
                        .map_err(|_| rusqlite::Error::InvalidQuery)?;
                    Ok(AccountRecord {
                        username: row.get(0)?,
                        password_hash: row.get(1)?,
                        cpu_hash: row.get(2)?,
                        ram_hash: row.get(3)?,
                        disk_hash: row.get(4)?,
                        created: row.get(5)?,
                        word_hashes,
                        balance: Amount::from_units(balance as u64),
                    })
                },
            )
            .optional()
            .map_err(|e| NodeError::Store(format!("Failed to load account: {}", e)))?;
        Ok(record)
    }

    fn username_taken(&self, username: &str) -> Result<bool> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM accounts WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| NodeError::Store(format!("Failed to check username: {}", e)))?;
        Ok(found.is_some())
    }

    fn insert_account(&self, record: &AccountRecord) -> Result<()> {
        let word_json = serde_json::to_string(&record.word_hashes)
            .map_err(|e| NodeError::Store(format!("Failed to serialize word list: {}", e)))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO accounts (username, password_hash, cpu_hash, ram_hash, disk_hash, created, word_hashes, balance)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.username,
                record.password_hash,
                record.cpu_hash,
                record.ram_hash,
                record.disk_hash,
                record.created,
                word_json,
                record.balance.units() as i64,
            ],
        )
        .map_err(|e| NodeError::Store(format!("Failed to insert account: {}", e)))?;
        Ok(())
    }

    fn balance(&self, username: &str) -> Result<Option<Amount>> {
        let conn = self.lock()?;
        let balance: Option<i64> = conn
            .query_row(
                "SELECT balance FROM accounts WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| NodeError::Store(format!("Failed to load balance: {}", e)))?;
        Ok(balance.map(|b| Amount::from_units(b as u64)))
    }

    fn set_balance(&self, username: &str, balance: Amount) -> Result<()> {
        let conn = self.lock()?;
        Self::update_balance_row(&conn, username, balance)
    }

    fn apply_transfer(
        &self,
        tx: &TransactionRecord,
        sender_balance: Amount,
        receiver_balance: Amount,
    ) -> Result<()> {
        let conn = self.lock()?;
        let sql_tx = conn
            .unchecked_transaction()
            .map_err(|e| NodeError::Store(format!("Failed to start transaction: {}", e)))?;

        let mut pending = tx.clone();
        pending.status = TxStatus::Pending;
        Self::insert_transaction_row(&sql_tx, &pending)?;
        Self::update_balance_row(&sql_tx, &tx.from_username, sender_balance)?;
        Self::update_balance_row(&sql_tx, &tx.to_username, receiver_balance)?;
        sql_tx
            .execute(
                "UPDATE transactions SET status = 'confirmed' WHERE id = ?1",
                params![tx.id],
            )
            .map_err(|e| NodeError::Store(format!("Failed to confirm transaction: {}", e)))?;

        sql_tx
            .commit()
            .map_err(|e| NodeError::Store(format!("Failed to commit transfer: {}", e)))?;
        Ok(())
    }

    fn record_transaction(&self, tx: &TransactionRecord) -> Result<()> {
        let conn = self.lock()?;
        Self::insert_transaction_row(&conn, tx)
    }

    fn transactions_for(&self, username: &str, limit: usize) -> Result<Vec<TransactionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, from_username, to_username, amount, fee, status, block_id, timestamp
                 FROM transactions
                 WHERE from_username = ?1 OR to_username = ?1
                 ORDER BY timestamp DESC, rowid DESC
                 LIMIT ?2",
            )
            .map_err(|e| NodeError::Store(format!("Failed to prepare history query: {}", e)))?;

        let rows = stmt
            .query_map(params![username, limit as i64], Self::row_to_transaction)
            .map_err(|e| NodeError::Store(format!("Failed to query history: {}", e)))?;

        let mut transactions = Vec::new();
        for row in rows {
            transactions
                .push(row.map_err(|e| NodeError::Store(format!("Failed to read history row: {}", e)))?);
        }
        Ok(transactions)
    }

    fn block_exists(&self, id: u64) -> Result<bool> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM blocks WHERE id = ?1", params![id as i64], |row| row.get(0))
            .optional()
            .map_err(|e| NodeError::Store(format!("Failed to check block: {}", e)))?;
        Ok(found.is_some())
    }

    fn apply_block(&self, block: &Block, miner_balance: Amount) -> Result<()> {
        let conn = self.lock()?;
        let sql_tx = conn
            .unchecked_transaction()
            .map_err(|e| NodeError::Store(format!("Failed to start transaction: {}", e)))?;

        sql_tx
            .execute(
                "INSERT INTO blocks (id, nonce, previous_hash, miner, payload, hash, difficulty, accepted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    block.id as i64,
                    block.nonce,
                    block.previous_hash,
                    block.miner,
                    block.payload,
                    block.hash,
                    block.difficulty as i64,
                    block.accepted_at,
                ],
            )
            .map_err(|e| NodeError::Store(format!("Failed to save block: {}", e)))?;
        Self::update_balance_row(&sql_tx, &block.miner, miner_balance)?;

        sql_tx
            .commit()
            .map_err(|e| NodeError::Store(format!("Failed to commit block: {}", e)))?;
        Ok(())
    }

    fn load_blocks(&self) -> Result<Vec<Block>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, nonce, previous_hash, miner, payload, hash, difficulty, accepted_at
                 FROM blocks ORDER BY id ASC",
            )
            .map_err(|e| NodeError::Store(format!("Failed to prepare block query: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                let difficulty: i64 = row.get(6)?;
                Ok(Block {
                    id: id as u64,
                    nonce: row.get(1)?,
                    previous_hash: row.get(2)?,
                    miner: row.get(3)?,
                    payload: row.get(4)?,
                    hash: row.get(5)?,
                    difficulty: difficulty as u32,
                    accepted_at: row.get(7)?,
                })
            })
            .map_err(|e| NodeError::Store(format!("Failed to query blocks: {}", e)))?;

        let mut blocks = Vec::new();
        for row in rows {
            blocks.push(row.map_err(|e| NodeError::Store(format!("Failed to load block: {}", e)))?);
        }
        Ok(blocks)
    }
}

/// In-memory store for tests and ephemeral tooling. Not used by the node
/// binary: a node without durable persistence would let mutating commands
/// succeed unpersisted.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    accounts: HashMap<String, AccountRecord>,
    transactions: Vec<TransactionRecord>,
    blocks: Vec<Block>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| NodeError::Store("Mutex poisoned".to_string()))
    }
}

impl Store for MemoryStore {
    fn account(&self, username: &str) -> Result<Option<AccountRecord>> {
        Ok(self.lock()?.accounts.get(username).cloned())
    }

    fn username_taken(&self, username: &str) -> Result<bool> {
        Ok(self.lock()?.accounts.contains_key(username))
    }

    fn insert_account(&self, record: &AccountRecord) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.accounts.contains_key(&record.username) {
            return Err(NodeError::Store(format!(
                "Account {} already inserted",
                record.username
            )));
        }
        inner.accounts.insert(record.username.clone(), record.clone());
        Ok(())
    }

    fn balance(&self, username: &str) -> Result<Option<Amount>> {
        Ok(self.lock()?.accounts.get(username).map(|a| a.balance))
    }

    fn set_balance(&self, username: &str, balance: Amount) -> Result<()> {
        let mut inner = self.lock()?;
        let account = inner
            .accounts
            .get_mut(username)
            .ok_or_else(|| NodeError::UnknownAccount(username.to_string()))?;
        account.balance = balance;
        Ok(())
    }

    fn apply_transfer(
        &self,
        tx: &TransactionRecord,
        sender_balance: Amount,
        receiver_balance: Amount,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.accounts.contains_key(&tx.from_username)
            || !inner.accounts.contains_key(&tx.to_username)
        {
            return Err(NodeError::UnknownAccount(tx.from_username.clone()));
        }
        let mut confirmed = tx.clone();
        confirmed.status = TxStatus::Confirmed;
        inner.transactions.push(confirmed);
        inner.accounts.get_mut(&tx.from_username).unwrap().balance = sender_balance;
        inner.accounts.get_mut(&tx.to_username).unwrap().balance = receiver_balance;
        Ok(())
    }

    fn record_transaction(&self, tx: &TransactionRecord) -> Result<()> {
        self.lock()?.transactions.push(tx.clone());
        Ok(())
    }

    fn transactions_for(&self, username: &str, limit: usize) -> Result<Vec<TransactionRecord>> {
        let inner = self.lock()?;
        let mut matching: Vec<TransactionRecord> = inner
            .transactions
            .iter()
            .filter(|tx| tx.from_username == username || tx.to_username == username)
            .cloned()
            .collect();
        matching.reverse();
        matching.truncate(limit);
        Ok(matching)
    }

    fn block_exists(&self, id: u64) -> Result<bool> {
        Ok(self.lock()?.blocks.iter().any(|b| b.id == id))
    }

    fn apply_block(&self, block: &Block, miner_balance: Amount) -> Result<()> {
        let mut inner = self.lock()?;
        let miner = inner
            .accounts
            .get_mut(&block.miner)
            .ok_or_else(|| NodeError::UnknownAccount(block.miner.clone()))?;
        miner.balance = miner_balance;
        inner.blocks.push(block.clone());
        Ok(())
    }

    fn load_blocks(&self) -> Result<Vec<Block>> {
        Ok(self.lock()?.blocks.clone())
    }
}
