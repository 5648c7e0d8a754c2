//! Chain validation and extension
//!
//! The chain cache mirrors the store's `blocks` table as an ordered vector
//! so linkage checks never touch the database. Validation itself is
//! stateless; extension (persist + miner reward + cache append + difficulty
//! recompute) is serialized behind one write lock so two simultaneous
//! submissions can never both claim the same next identifier.

use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use crate::amount::Amount;
use crate::block::{Block, BlockSubmission};
use crate::crypto;
use crate::difficulty;
use crate::error::{NodeError, Result};
use crate::ledger::Ledger;
use crate::persistence::Store;

/// Reward credited to the miner of an accepted block.
pub const BLOCK_REWARD: Amount = Amount::from_coins(100);

struct ChainInner {
    blocks: Vec<Block>,
    difficulty: u32,
}

pub struct ChainState {
    inner: RwLock<ChainInner>,
    store: Arc<dyn Store>,
}

/// Stateless validation of a parsed submission against the chain tail.
/// Checks run in a fixed order so the first failure decides the reason.
pub fn validate_submission(
    submission: &BlockSubmission,
    raw_text: &str,
    claimed_hash: &str,
    tail: Option<&Block>,
    already_exists: bool,
    required_difficulty: u32,
) -> Result<()> {
    let reject = |reason: String| Err(NodeError::Validation(reason));

    if already_exists {
        return reject("Block already exists".to_string());
    }

    // The hash must cover the exact submitted bytes, not a re-rendering;
    // otherwise a miner could claim a favorable hash for different content.
    if crypto::hash_single(raw_text) != claimed_hash {
        return reject("Hash mismatch".to_string());
    }

    let required_prefix = "0".repeat(required_difficulty as usize);
    if !claimed_hash.starts_with(&required_prefix) {
        return reject(format!(
            "Hash does not meet difficulty requirement: {}",
            required_prefix
        ));
    }

    let expected_id = tail.map(|t| t.id + 1).unwrap_or(1);
    if submission.id != expected_id {
        return reject(format!(
            "Invalid block ID. Expected {}, got {}",
            expected_id, submission.id
        ));
    }

    if submission.id > 1 {
        match tail {
            Some(tail) if tail.hash == submission.previous_hash => {}
            _ => return reject("Invalid previous hash".to_string()),
        }
    }

    Ok(())
}

impl ChainState {
    /// Load the chain cache from the store. The tail block's recorded
    /// difficulty is the source of truth on restart; an empty chain starts
    /// at the initial constant.
    pub fn load(store: Arc<dyn Store>) -> Result<Self> {
        let blocks = store.load_blocks()?;
        let resumed = blocks
            .last()
            .map(|b| b.difficulty)
            .unwrap_or(difficulty::INITIAL_DIFFICULTY);
        let difficulty = difficulty::recompute(&blocks, resumed);
        info!("Loaded {} blocks (difficulty {})", blocks.len(), difficulty);
        Ok(ChainState {
            inner: RwLock::new(ChainInner { blocks, difficulty }),
            store,
        })
    }

    pub fn height(&self) -> u64 {
        self.inner.read().blocks.last().map(|b| b.id).unwrap_or(0)
    }

    pub fn difficulty(&self) -> u32 {
        self.inner.read().difficulty
    }

    pub fn tail_hash(&self) -> Option<String> {
        self.inner.read().blocks.last().map(|b| b.hash.clone())
    }

    /// Validate a submission and, on acceptance, extend the chain: the block
    /// row and the miner's reward commit as one store transaction, then the
    /// cache is appended and difficulty recomputed. The whole operation
    /// holds the chain write lock; the ledger lock nests inside it and never
    /// the other way around.
    pub fn submit(&self, ledger: &Ledger, raw_text: &str, claimed_hash: &str) -> Result<Block> {
        let mut inner = self.inner.write();

        let submission = BlockSubmission::parse(raw_text)?;
        let already_exists = inner.blocks.iter().any(|b| b.id == submission.id)
            || self.store.block_exists(submission.id)?;
        validate_submission(
            &submission,
            raw_text,
            claimed_hash,
            inner.blocks.last(),
            already_exists,
            inner.difficulty,
        )?;

        let block = submission.into_block(
            claimed_hash.to_string(),
            inner.difficulty,
            Utc::now().timestamp(),
        );
        ledger.apply_block_reward(&block, BLOCK_REWARD)?;

        inner.blocks.push(block.clone());
        inner.difficulty = difficulty::recompute(&inner.blocks, inner.difficulty);
        info!(
            "Accepted block {} from {} (difficulty now {})",
            block.id, block.miner, inner.difficulty
        );
        Ok(block)
    }
}
