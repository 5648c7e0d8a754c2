//! Difficulty retargeting from recent block timing
//!
//! The current difficulty is the number of leading zero hex characters a
//! block hash must carry. It starts at a fixed constant and moves one step
//! at a time based on the average spacing of the last [`RETARGET_WINDOW`]
//! blocks.

use crate::block::Block;

pub const INITIAL_DIFFICULTY: u32 = 2;
pub const BLOCK_TIME_TARGET_SECS: i64 = 10;
pub const RETARGET_WINDOW: usize = 10;

/// Derive the next difficulty from the chain's recent timing. Returns the
/// current value unchanged while fewer than [`RETARGET_WINDOW`] blocks
/// exist. Callers serialize this against chain extension; the chain lock is
/// held for the duration.
pub fn recompute(blocks: &[Block], current: u32) -> u32 {
    if blocks.len() < RETARGET_WINDOW {
        return current;
    }

    let recent = &blocks[blocks.len() - RETARGET_WINDOW..];
    let total_secs: i64 = recent
        .windows(2)
        .map(|pair| pair[1].accepted_at - pair[0].accepted_at)
        .sum();
    let average = total_secs as f64 / (RETARGET_WINDOW - 1) as f64;

    if average < BLOCK_TIME_TARGET_SECS as f64 {
        current + 1
    } else if average > (2 * BLOCK_TIME_TARGET_SECS) as f64 {
        current.saturating_sub(1).max(1)
    } else {
        current
    }
}
