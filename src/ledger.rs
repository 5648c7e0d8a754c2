//! The transaction ledger
//!
//! Single source of truth for balances. Every mutation runs behind one
//! mutation lock held from the balance check through the store commit, so
//! two concurrent transfers can never both pass the check against a stale
//! balance. Read-only queries go straight to the store and observe only
//! committed state.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::amount::Amount;
use crate::block::Block;
use crate::error::{NodeError, Result};
use crate::identity::Fingerprints;
use crate::persistence::{AccountRecord, Store, TransactionRecord, TxStatus};

pub struct Ledger {
    store: Arc<dyn Store>,
    fee_basis_points: u64,
    /// Serializes all balance mutations. Lock order: the chain lock, when
    /// involved at all, is taken first (see `ChainState::submit`).
    write_lock: Mutex<()>,
}

fn timestamp_now() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>, fee_basis_points: u64) -> Self {
        Ledger {
            store,
            fee_basis_points,
            write_lock: Mutex::new(()),
        }
    }

    /// Current committed balance. Unknown users read as zero rather than
    /// erroring; a balance probe is not an account probe.
    pub fn balance(&self, username: &str) -> Result<Amount> {
        let balance = self.retry_read(|| self.store.balance(username))?;
        Ok(balance.unwrap_or(Amount::ZERO))
    }

    pub fn account(&self, username: &str) -> Result<Option<AccountRecord>> {
        self.retry_read(|| self.store.account(username))
    }

    pub fn username_taken(&self, username: &str) -> Result<bool> {
        self.retry_read(|| self.store.username_taken(username))
    }

    pub fn create_account(
        &self,
        username: &str,
        password_hash: String,
        fingerprints: Fingerprints,
        word_hashes: Vec<String>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock();
        if self.store.username_taken(username)? {
            return Err(NodeError::UsernameTaken(username.to_string()));
        }
        let record = AccountRecord {
            username: username.to_string(),
            password_hash,
            cpu_hash: fingerprints.cpu,
            ram_hash: fingerprints.ram,
            disk_hash: fingerprints.disk,
            created: timestamp_now(),
            word_hashes,
            balance: Amount::ZERO,
        };
        self.store.insert_account(&record)?;
        info!("Created account {}", username);
        Ok(())
    }

    /// Move `amount` plus the fee out of `from` and `amount` into `to`,
    /// atomically. Returns the confirmed transaction id.
    pub fn transfer(&self, from: &str, to: &str, amount: Amount) -> Result<String> {
        if amount.is_zero() {
            return Err(NodeError::InvalidAmount(amount.to_string()));
        }

        let _guard = self.write_lock.lock();

        if self.store.account(from)?.is_none() || self.store.account(to)?.is_none() {
            return Err(NodeError::UnknownAccount(format!("{} or {}", from, to)));
        }

        let fee = amount.fee(self.fee_basis_points);
        let required = amount
            .checked_add(fee)
            .ok_or_else(|| NodeError::InvalidAmount(amount.to_string()))?;
        let available = self.store.balance(from)?.unwrap_or(Amount::ZERO);

        let mut record = TransactionRecord {
            id: Uuid::new_v4().to_string(),
            from_username: from.to_string(),
            to_username: to.to_string(),
            amount,
            fee,
            status: TxStatus::Pending,
            block_id: None,
            timestamp: timestamp_now(),
        };

        if available < required {
            // Bookkeeping only; balances are untouched.
            record.status = TxStatus::Failed;
            if let Err(e) = self.store.record_transaction(&record) {
                warn!("Failed to record rejected transfer: {}", e);
            }
            return Err(NodeError::InsufficientFunds { required, available });
        }

        let sender_balance = available
            .checked_sub(required)
            .ok_or_else(|| NodeError::InvalidAmount(amount.to_string()))?;
        let receiver_balance = self
            .store
            .balance(to)?
            .unwrap_or(Amount::ZERO)
            .checked_add(amount)
            .ok_or_else(|| NodeError::InvalidAmount(amount.to_string()))?;

        self.store
            .apply_transfer(&record, sender_balance, receiver_balance)?;
        info!("{} sent {} to {} (fee: {})", from, amount, to, fee);
        Ok(record.id)
    }

    /// Credit a balance outside any transfer: block rewards and the
    /// administrative MINE / AIR_DROP injections. Returns the new balance.
    pub fn credit_reward(&self, username: &str, amount: Amount) -> Result<Amount> {
        let _guard = self.write_lock.lock();
        let current = self
            .store
            .balance(username)?
            .ok_or_else(|| NodeError::UnknownAccount(username.to_string()))?;
        let updated = current
            .checked_add(amount)
            .ok_or_else(|| NodeError::InvalidAmount(amount.to_string()))?;
        self.store.set_balance(username, updated)?;
        info!("Credited {} to {} (balance: {})", amount, username, updated);
        Ok(updated)
    }

    /// Commit an accepted block together with its miner reward as one store
    /// transaction. Called by the chain with the chain lock already held.
    pub fn apply_block_reward(&self, block: &Block, reward: Amount) -> Result<Amount> {
        let _guard = self.write_lock.lock();
        let current = self
            .store
            .balance(&block.miner)?
            .ok_or_else(|| NodeError::UnknownAccount(block.miner.clone()))?;
        let updated = current
            .checked_add(reward)
            .ok_or_else(|| NodeError::InvalidAmount(reward.to_string()))?;
        self.store.apply_block(block, updated)?;
        Ok(updated)
    }

    /// Transactions where the user is sender or receiver, most recent first.
    pub fn history(&self, username: &str, limit: usize) -> Result<Vec<TransactionRecord>> {
        self.retry_read(|| self.store.transactions_for(username, limit))
    }

    /// Read-only store queries get one retry on store failure; everything
    /// else propagates immediately.
    fn retry_read<T>(&self, read: impl Fn() -> Result<T>) -> Result<T> {
        match read() {
            Err(NodeError::Store(first)) => {
                warn!("Store read failed, retrying once: {}", first);
                read()
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{self, Fingerprints};
    use crate::persistence::MemoryStore;

    fn test_ledger() -> Ledger {
        Ledger::new(Arc::new(MemoryStore::new()), 100)
    }

    fn register(ledger: &Ledger, name: &str) {
        ledger
            .create_account(
                name,
                identity::hash_password("pw"),
                Fingerprints::from_hardware(None),
                vec![],
            )
            .unwrap();
    }

    #[test]
    fn test_unknown_user_reads_zero() {
        let ledger = test_ledger();
        assert_eq!(ledger.balance("nobody").unwrap(), Amount::ZERO);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let ledger = test_ledger();
        register(&ledger, "alice");
        let err = ledger
            .create_account(
                "alice",
                identity::hash_password("pw"),
                Fingerprints::from_hardware(None),
                vec![],
            )
            .unwrap_err();
        assert!(matches!(err, NodeError::UsernameTaken(_)));
    }

    #[test]
    fn test_transfer_debits_amount_plus_fee() {
        let ledger = test_ledger();
        register(&ledger, "alice");
        register(&ledger, "bob");
        ledger.credit_reward("alice", Amount::from_coins(100)).unwrap();

        ledger.transfer("alice", "bob", Amount::from_coins(10)).unwrap();

        assert_eq!(ledger.balance("alice").unwrap().to_string(), "89.90000000");
        assert_eq!(ledger.balance("bob").unwrap().to_string(), "10.00000000");
    }

    #[test]
    fn test_insufficient_funds_leaves_balances_untouched() {
        let ledger = test_ledger();
        register(&ledger, "alice");
        register(&ledger, "bob");
        ledger.credit_reward("alice", Amount::from_coins(10)).unwrap();

        // 10 + 1% fee needs 10.10; alice only has 10.
        let err = ledger
            .transfer("alice", "bob", Amount::from_coins(10))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Insufficient balance. Required: 10.10000000, Available: 10.00000000"
        );
        assert_eq!(ledger.balance("alice").unwrap(), Amount::from_coins(10));
        assert_eq!(ledger.balance("bob").unwrap(), Amount::ZERO);

        let history = ledger.history("alice", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TxStatus::Failed);
    }

    #[test]
    fn test_transfer_to_unknown_account_fails() {
        let ledger = test_ledger();
        register(&ledger, "alice");
        ledger.credit_reward("alice", Amount::from_coins(100)).unwrap();
        let err = ledger
            .transfer("alice", "ghost", Amount::from_coins(1))
            .unwrap_err();
        assert!(matches!(err, NodeError::UnknownAccount(_)));
        assert_eq!(ledger.balance("alice").unwrap(), Amount::from_coins(100));
    }

    #[test]
    fn test_zero_transfer_rejected() {
        let ledger = test_ledger();
        register(&ledger, "alice");
        register(&ledger, "bob");
        assert!(ledger.transfer("alice", "bob", Amount::ZERO).is_err());
    }

    #[test]
    fn test_credit_reward_requires_account() {
        let ledger = test_ledger();
        assert!(matches!(
            ledger.credit_reward("ghost", Amount::from_coins(1)),
            Err(NodeError::UnknownAccount(_))
        ));
    }

    #[test]
    fn test_history_order_and_direction() {
        let ledger = test_ledger();
        register(&ledger, "alice");
        register(&ledger, "bob");
        ledger.credit_reward("alice", Amount::from_coins(100)).unwrap();
        ledger.credit_reward("bob", Amount::from_coins(100)).unwrap();

        ledger.transfer("alice", "bob", Amount::from_coins(1)).unwrap();
        ledger.transfer("bob", "alice", Amount::from_coins(2)).unwrap();

        let history = ledger.history("alice", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].from_username, "bob");
        assert_eq!(history[1].from_username, "alice");
    }

    #[test]
    fn test_concurrent_transfers_never_go_negative() {
        use std::thread;

        let ledger = Arc::new(test_ledger());
        register(&ledger, "alice");
        register(&ledger, "bob");
        register(&ledger, "carol");
        ledger.credit_reward("alice", Amount::from_coins(100)).unwrap();
        ledger.credit_reward("bob", Amount::from_coins(100)).unwrap();
        ledger.credit_reward("carol", Amount::from_coins(100)).unwrap();

        let users = ["alice", "bob", "carol"];
        let mut handles = Vec::new();
        for i in 0..8 {
            let ledger = ledger.clone();
            handles.push(thread::spawn(move || {
                for j in 0..50 {
                    let from = users[(i + j) % 3];
                    let to = users[(i + j + 1) % 3];
                    // Failures (insufficient funds) are expected; negative
                    // balances are not.
                    let _ = ledger.transfer(from, to, Amount::from_coins(7));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let total: u64 = users
            .iter()
            .map(|u| ledger.balance(u).unwrap().units())
            .sum();
        // Fees burn value, so the pool can only shrink from the initial 300.
        assert!(total <= Amount::from_coins(300).units());
        for user in users {
            assert!(ledger.balance(user).unwrap() >= Amount::ZERO);
        }
    }
}
