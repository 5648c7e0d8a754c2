//! Block records and the canonical wire encoding
//!
//! Miners submit blocks as period-separated labelled text. The encoding is
//! kept for wire compatibility but parsed into a [`BlockSubmission`] at the
//! boundary; nothing past the validator touches free-form strings.

use serde::{Deserialize, Serialize};

use crate::error::{NodeError, Result};

/// An accepted block as held in the chain cache and the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: u64,
    pub nonce: String,
    pub previous_hash: String,
    pub miner: String,
    /// Serialized transaction payload, opaque at this layer.
    pub payload: String,
    pub hash: String,
    /// Difficulty in force when the block was accepted.
    pub difficulty: u32,
    /// Acceptance time, unix seconds.
    pub accepted_at: i64,
}

/// A miner's block submission, parsed from canonical text but not yet
/// validated or accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSubmission {
    pub id: u64,
    pub nonce: String,
    pub previous_hash: String,
    pub miner: String,
    pub payload: String,
}

/// Ordered field labels of the canonical encoding.
const FIELD_LABELS: [&str; 5] = ["Block ID", "Nonce", "Previous Hash", "MinerPublicID", "Transactions"];

impl BlockSubmission {
    /// Parse canonical block text. Structure errors all collapse to the
    /// single "Invalid block format" rejection so a miner cannot probe
    /// parser internals through reason strings.
    pub fn parse(text: &str) -> Result<Self> {
        let bad = || NodeError::Validation("Invalid block format".to_string());

        let parts: Vec<&str> = text.split('.').collect();
        if parts.len() < FIELD_LABELS.len() {
            return Err(bad());
        }

        let mut values = Vec::with_capacity(FIELD_LABELS.len());
        for part in parts.iter().take(FIELD_LABELS.len()) {
            let value = part.split_once(": ").map(|(_, v)| v.trim()).ok_or_else(bad)?;
            values.push(value.to_string());
        }

        let id: u64 = values[0].parse().map_err(|_| bad())?;
        if id == 0 {
            return Err(bad());
        }

        Ok(BlockSubmission {
            id,
            nonce: values[1].clone(),
            previous_hash: values[2].clone(),
            miner: values[3].clone(),
            payload: values[4].clone(),
        })
    }

    /// Render the canonical text. Miners hash exactly this rendering.
    pub fn canonical_text(&self) -> String {
        format!(
            "Block ID: {}. Nonce: {}. Previous Hash: {}. MinerPublicID: {}. Transactions: {}",
            self.id, self.nonce, self.previous_hash, self.miner, self.payload
        )
    }

    /// Promote an accepted submission into a chain record.
    pub fn into_block(self, hash: String, difficulty: u32, accepted_at: i64) -> Block {
        Block {
            id: self.id,
            nonce: self.nonce,
            previous_hash: self.previous_hash,
            miner: self.miner,
            payload: self.payload,
            hash,
            difficulty,
            accepted_at,
        }
    }
}
