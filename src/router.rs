//! Command dispatch
//!
//! One decoded message in, one response payload out. Block acceptance also
//! yields a broadcast payload for every other connected session. All
//! failure paths answer the client; nothing is silently dropped.

use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::amount::Amount;
use crate::chain::{ChainState, BLOCK_REWARD};
use crate::error::NodeError;
use crate::identity::{self, Fingerprints, LoginOutcome};
use crate::ledger::Ledger;
use crate::persistence::TransactionRecord;
use crate::protocol::{parse_command, Command};

/// Outcome of dispatching one message.
pub struct Dispatch {
    pub response: String,
    /// Payload to fan out to every other session, set on block acceptance.
    pub broadcast: Option<String>,
}

impl Dispatch {
    fn reply(response: String) -> Self {
        Dispatch { response, broadcast: None }
    }
}

/// Default row cap for history queries.
const HISTORY_LIMIT: usize = 50;

pub struct Router {
    ledger: Arc<Ledger>,
    chain: Arc<ChainState>,
    admin_enabled: bool,
}

impl Router {
    pub fn new(ledger: Arc<Ledger>, chain: Arc<ChainState>, admin_enabled: bool) -> Self {
        Router { ledger, chain, admin_enabled }
    }

    pub fn dispatch(&self, msg: &str) -> Dispatch {
        let command = match parse_command(msg) {
            Ok(command) => command,
            Err(e) => return Dispatch::reply(e.response),
        };

        match command {
            Command::GetBalance { username } => Dispatch::reply(self.get_balance(&username)),
            Command::SendTransaction { from, to, amount } => {
                Dispatch::reply(self.send_transaction(&from, &to, amount))
            }
            Command::GetHistory { username } => Dispatch::reply(self.get_history(&username)),
            Command::CheckUsername { username } => Dispatch::reply(self.check_username(&username)),
            Command::Register { username, password, words, hardware } => {
                Dispatch::reply(self.register(&username, &password, &words, hardware.as_ref()))
            }
            Command::Login { username, password, words, hardware } => {
                Dispatch::reply(self.login(&username, &password, words.as_deref(), hardware.as_ref()))
            }
            Command::Mine { username, .. } => Dispatch::reply(self.mine(&username)),
            Command::AirDrop { username, amount } => {
                Dispatch::reply(self.air_drop(&username, amount))
            }
            Command::SubmitBlock { text, claimed_hash } => {
                self.submit_block(msg, &text, &claimed_hash)
            }
            Command::Unknown { text } => Dispatch::reply(format!("MSG received: {}", text)),
        }
    }

    fn get_balance(&self, username: &str) -> String {
        match self.ledger.balance(username) {
            Ok(balance) => json!({ "balance": balance.to_string() }).to_string(),
            Err(e) => {
                warn!("Balance query for {} failed: {}", username, e);
                format!("BALANCE_ERROR: {}", e)
            }
        }
    }

    fn send_transaction(&self, from: &str, to: &str, amount: Amount) -> String {
        match self.ledger.transfer(from, to, amount) {
            Ok(id) => format!("SEND_SUCCESS: Transaction successful. ID: {}", id),
            Err(e @ NodeError::InsufficientFunds { .. }) => {
                format!("TRANSACTION_FAILED: {}", e)
            }
            Err(NodeError::UnknownAccount(_)) => {
                "TRANSACTION_FAILED: One or both users not found".to_string()
            }
            Err(NodeError::InvalidAmount(_)) => {
                "TRANSACTION_FAILED: Invalid transaction data".to_string()
            }
            Err(e) => {
                warn!("Transfer {} -> {} failed: {}", from, to, e);
                format!("TRANSACTION_FAILED: {}", e)
            }
        }
    }

    fn get_history(&self, username: &str) -> String {
        match self.ledger.history(username, HISTORY_LIMIT) {
            Ok(records) => {
                let entries: Vec<serde_json::Value> = records
                    .iter()
                    .map(|tx| history_entry(tx, username))
                    .collect();
                serde_json::Value::Array(entries).to_string()
            }
            Err(e) => {
                warn!("History query for {} failed: {}", username, e);
                format!("HISTORY_ERROR: {}", e)
            }
        }
    }

    fn check_username(&self, username: &str) -> String {
        match self.ledger.username_taken(username) {
            Ok(true) => format!("USERNAME_TAKEN: {} is already registered", username),
            Ok(false) => format!("USERNAME_AVAILABLE: {} is available", username),
            Err(e) => format!("USERNAME_CHECK_ERROR: {}", e),
        }
    }

    fn register(
        &self,
        username: &str,
        password: &str,
        words: &[String],
        hardware: Option<&crate::identity::HardwareInfo>,
    ) -> String {
        let result = self.ledger.create_account(
            username,
            identity::hash_password(password),
            Fingerprints::from_hardware(hardware),
            identity::hash_words(words),
        );
        match result {
            Ok(()) => "REGISTRATION_SUCCESS: User created successfully".to_string(),
            Err(NodeError::UsernameTaken(_)) => {
                "REGISTRATION_FAILED: Username already exists".to_string()
            }
            Err(e) => {
                warn!("Registration for {} failed: {}", username, e);
                format!("REGISTRATION_FAILED: {}", e)
            }
        }
    }

    fn login(
        &self,
        username: &str,
        password: &str,
        words: Option<&[String]>,
        hardware: Option<&crate::identity::HardwareInfo>,
    ) -> String {
        let account = match self.ledger.account(username) {
            Ok(Some(account)) => account,
            Ok(None) => return "LOGIN_FAILED: User not found".to_string(),
            Err(e) => return format!("LOGIN_FAILED: {}", e),
        };

        match identity::verify_login(&account, password, words, hardware) {
            LoginOutcome::Success => "LOGIN_SUCCESS: Login successful".to_string(),
            LoginOutcome::BadPassword => "LOGIN_FAILED: Invalid password".to_string(),
            LoginOutcome::HardwareMismatch => "LOGIN_FAILED: HARDWARE_MISMATCH".to_string(),
            LoginOutcome::BadRecoveryWords => "LOGIN_FAILED: Invalid security words".to_string(),
        }
    }

    fn mine(&self, username: &str) -> String {
        if !self.admin_enabled {
            return "MINE_FAILED: Administrative commands are disabled".to_string();
        }
        // Simulated mining: full block reward, no block record, no effect on
        // chain length or difficulty.
        match self.ledger.credit_reward(username, BLOCK_REWARD) {
            Ok(_) => format!("MINE_SUCCESS: Mined {} VNC for {}", BLOCK_REWARD, username),
            Err(NodeError::UnknownAccount(_)) => {
                format!("MINE_FAILED: User {} not found", username)
            }
            Err(e) => format!("MINE_FAILED: {}", e),
        }
    }

    fn air_drop(&self, username: &str, amount: Amount) -> String {
        if !self.admin_enabled {
            return "AIR_DROP_FAILED: Administrative commands are disabled".to_string();
        }
        match self.ledger.credit_reward(username, amount) {
            Ok(_) => format!("AIR_DROP_SUCCESS: {} VNC airdropped to {}", amount, username),
            Err(NodeError::UnknownAccount(_)) => {
                format!("AIR_DROP_FAILED: User {} not found", username)
            }
            Err(e) => format!("AIR_DROP_FAILED: {}", e),
        }
    }

    fn submit_block(&self, raw_msg: &str, text: &str, claimed_hash: &str) -> Dispatch {
        match self.chain.submit(&self.ledger, text, claimed_hash) {
            Ok(block) => Dispatch {
                response: format!("BLOCK ACCEPTED: Block {} appended", block.id),
                broadcast: Some(format!("NEW_BLOCK|||{}", raw_msg)),
            },
            Err(NodeError::Validation(reason)) => {
                Dispatch::reply(format!("BLOCK REJECTED: {}", reason))
            }
            Err(NodeError::UnknownAccount(miner)) => {
                Dispatch::reply(format!("BLOCK REJECTED: Unknown miner {}", miner))
            }
            Err(e) => {
                warn!("Block submission failed: {}", e);
                Dispatch::reply("BLOCK REJECTED: Storage failed".to_string())
            }
        }
    }
}

fn history_entry(tx: &TransactionRecord, username: &str) -> serde_json::Value {
    let direction = if tx.from_username == username { "sent" } else { "received" };
    json!({
        "id": tx.id,
        "from": tx.from_username,
        "to": tx.to_username,
        "amount": tx.amount.to_string(),
        "fee": tx.fee.to_string(),
        "status": tx.status.as_str(),
        "timestamp": tx.timestamp,
        "type": direction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;
    use crate::persistence::MemoryStore;

    fn test_router(admin_enabled: bool) -> Router {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(Ledger::new(store.clone(), 100));
        let chain = Arc::new(ChainState::load(store).unwrap());
        Router::new(ledger, chain, admin_enabled)
    }

    fn register(router: &Router, name: &str) {
        let response = router
            .dispatch(&format!(r#"REGISTER|{}|pw|["cat","dog","sun","moon","tree"]"#, name))
            .response;
        assert!(response.starts_with("REGISTRATION_SUCCESS"), "{}", response);
    }

    #[test]
    fn test_balance_of_unknown_user_is_zero() {
        let router = test_router(true);
        assert_eq!(
            router.dispatch("GET_BALANCE|nobody").response,
            r#"{"balance":"0.00000000"}"#
        );
    }

    #[test]
    fn test_alice_bob_scenario() {
        let router = test_router(true);
        register(&router, "alice");
        register(&router, "bob");

        let response = router.dispatch("AIR_DROP|alice|100").response;
        assert!(response.starts_with("AIR_DROP_SUCCESS"), "{}", response);

        let response = router.dispatch("SEND_TRANSACTION|alice|bob|10").response;
        assert!(response.starts_with("SEND_SUCCESS"), "{}", response);

        assert_eq!(
            router.dispatch("GET_BALANCE|alice").response,
            r#"{"balance":"89.90000000"}"#
        );
        assert_eq!(
            router.dispatch("GET_BALANCE|bob").response,
            r#"{"balance":"10.00000000"}"#
        );
    }

    #[test]
    fn test_insufficient_funds_embeds_required_and_available() {
        let router = test_router(true);
        register(&router, "alice");
        register(&router, "bob");

        let response = router.dispatch("SEND_TRANSACTION|alice|bob|10").response;
        assert_eq!(
            response,
            "TRANSACTION_FAILED: Insufficient balance. Required: 10.10000000, Available: 0.00000000"
        );
    }

    #[test]
    fn test_check_username() {
        let router = test_router(true);
        register(&router, "alice");
        assert_eq!(
            router.dispatch("CHECK_USERNAME|alice").response,
            "USERNAME_TAKEN: alice is already registered"
        );
        assert_eq!(
            router.dispatch("CHECK_USERNAME|carol").response,
            "USERNAME_AVAILABLE: carol is available"
        );
    }

    #[test]
    fn test_login_hardware_mismatch_signal() {
        let router = test_router(true);
        let response = router
            .dispatch(r#"REGISTER|alice|pw|["cat"]|{"cpu_id":"c1","ram_id":"r1","disk_serial":"d1"}"#)
            .response;
        assert!(response.starts_with("REGISTRATION_SUCCESS"), "{}", response);

        // Two of three fingerprints changed, no recovery words supplied.
        let response = router
            .dispatch(r#"LOGIN|alice|pw||{"cpu_id":"c1","ram_id":"other","disk_serial":"other"}"#)
            .response;
        assert_eq!(response, "LOGIN_FAILED: HARDWARE_MISMATCH");

        // Same device state but the registered words supplied in order.
        let response = router
            .dispatch(r#"LOGIN|alice|pw|["cat"]|{"cpu_id":"c1","ram_id":"other","disk_serial":"other"}"#)
            .response;
        assert_eq!(response, "LOGIN_SUCCESS: Login successful");
    }

    #[test]
    fn test_mine_disabled_by_config() {
        let router = test_router(false);
        register(&router, "alice");
        assert_eq!(
            router.dispatch("MINE|alice|10").response,
            "MINE_FAILED: Administrative commands are disabled"
        );
        assert_eq!(
            router.dispatch("GET_BALANCE|alice").response,
            r#"{"balance":"0.00000000"}"#
        );
    }

    #[test]
    fn test_mine_credits_block_reward() {
        let router = test_router(true);
        register(&router, "alice");
        let response = router.dispatch("MINE|alice|10").response;
        assert_eq!(response, "MINE_SUCCESS: Mined 100.00000000 VNC for alice");
        assert_eq!(
            router.dispatch("GET_BALANCE|alice").response,
            r#"{"balance":"100.00000000"}"#
        );
    }

    #[test]
    fn test_history_marks_direction() {
        let router = test_router(true);
        register(&router, "alice");
        register(&router, "bob");
        router.dispatch("AIR_DROP|alice|50");
        router.dispatch("SEND_TRANSACTION|alice|bob|5");

        let response = router.dispatch("GET_HISTORY|bob").response;
        let entries: Vec<serde_json::Value> = serde_json::from_str(&response).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["type"], "received");
        assert_eq!(entries[0]["amount"], "5.00000000");
        assert_eq!(entries[0]["status"], "confirmed");
    }

    #[test]
    fn test_block_submission_accept_and_duplicate() {
        let router = test_router(true);
        register(&router, "miner");

        // Grind a genesis-height block that satisfies the initial difficulty.
        let mut nonce = 0u64;
        let (text, hash) = loop {
            let text = format!(
                "Block ID: 1. Nonce: {}. Previous Hash: none. MinerPublicID: miner. Transactions: none",
                nonce
            );
            let hash = crypto::hash_single(&text);
            if hash.starts_with("00") {
                break (text, hash);
            }
            nonce += 1;
        };

        let msg = format!("{}|||{}", text, hash);
        let dispatch = router.dispatch(&msg);
        assert!(dispatch.response.starts_with("BLOCK ACCEPTED"), "{}", dispatch.response);
        assert_eq!(dispatch.broadcast.as_deref(), Some(format!("NEW_BLOCK|||{}", msg).as_str()));
        assert_eq!(
            router.dispatch("GET_BALANCE|miner").response,
            r#"{"balance":"100.00000000"}"#
        );

        // Identical resubmission: rejected, balance unchanged.
        let dispatch = router.dispatch(&msg);
        assert_eq!(dispatch.response, "BLOCK REJECTED: Block already exists");
        assert!(dispatch.broadcast.is_none());
        assert_eq!(
            router.dispatch("GET_BALANCE|miner").response,
            r#"{"balance":"100.00000000"}"#
        );
    }

    #[test]
    fn test_block_with_weak_hash_rejected() {
        let router = test_router(true);
        register(&router, "miner");

        // Find a block whose true hash does NOT meet difficulty 2.
        let mut nonce = 0u64;
        let (text, hash) = loop {
            let text = format!(
                "Block ID: 1. Nonce: {}. Previous Hash: none. MinerPublicID: miner. Transactions: none",
                nonce
            );
            let hash = crypto::hash_single(&text);
            if !hash.starts_with("00") {
                break (text, hash);
            }
            nonce += 1;
        };

        let dispatch = router.dispatch(&format!("{}|||{}", text, hash));
        assert_eq!(
            dispatch.response,
            "BLOCK REJECTED: Hash does not meet difficulty requirement: 00"
        );
        assert_eq!(
            router.dispatch("GET_BALANCE|miner").response,
            r#"{"balance":"0.00000000"}"#
        );
    }

    #[test]
    fn test_unknown_message_echoed() {
        let router = test_router(true);
        assert_eq!(
            router.dispatch("ping").response,
            "MSG received: ping"
        );
    }
}
