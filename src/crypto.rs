//! Hash primitives for VanillaChain
//!
//! Three fixed depths over one BLAKE3 digest, each producing a lowercase hex
//! string. The depth conventions are load-bearing and must not drift:
//! credentials use [`hash_double`], recovery words and hardware fingerprints
//! use [`hash_single`] per item, and block content is hashed with a single
//! application of the base digest. [`hash_triple`] exists only for the
//! startup self-test.

use crate::error::{NodeError, Result};

/// Input used by the startup self-test.
const SELF_TEST_INPUT: &str = "test";

/// Expected digests of [`SELF_TEST_INPUT`] at each depth. A mismatch means
/// the digest primitive is corrupted and the process must refuse to start.
const SINGLE_FIXTURE: &str = "4878ca0425c739fa427f7eda20fe845f6b2e46ba5fe2a14df5b1e32f50603215";
const DOUBLE_FIXTURE: &str = "55beb65d3293549b07cf215978375cf674d82de8657775da6c0f697b4e6b5e0b";
const TRIPLE_FIXTURE: &str = "1af8e96926a936cce32a1e304a068a3379968fd28c0843dcb08186adfaba1441";

/// One application of the base digest.
pub fn hash_single(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

/// Digest of the hex encoding of the first digest.
pub fn hash_double(input: &str) -> String {
    hash_single(&hash_single(input))
}

/// Third chained digest. Reserved; no ledger operation depends on it.
pub fn hash_triple(input: &str) -> String {
    hash_single(&hash_double(input))
}

/// Verify all three depths against known fixtures. Called once at startup;
/// failure is fatal to the process.
pub fn self_test() -> Result<()> {
    let checks: [(&str, fn(&str) -> String); 3] = [
        (SINGLE_FIXTURE, hash_single),
        (DOUBLE_FIXTURE, hash_double),
        (TRIPLE_FIXTURE, hash_triple),
    ];

    for (depth, (expected, hash_fn)) in checks.iter().enumerate() {
        let actual = hash_fn(SELF_TEST_INPUT);
        if actual != *expected {
            return Err(NodeError::Crypto(format!(
                "depth-{} digest of {:?} was {}, expected {}",
                depth + 1,
                SELF_TEST_INPUT,
                actual,
                expected
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_hash_fixture() {
        assert_eq!(hash_single("test"), SINGLE_FIXTURE);
    }

    #[test]
    fn test_double_hash_fixture() {
        assert_eq!(hash_double("test"), DOUBLE_FIXTURE);
    }

    #[test]
    fn test_triple_hash_fixture() {
        assert_eq!(hash_triple("test"), TRIPLE_FIXTURE);
    }

    #[test]
    fn test_depths_chain() {
        let single = hash_single("chained");
        assert_eq!(hash_double("chained"), hash_single(&single));
        assert_eq!(hash_triple("chained"), hash_single(&hash_single(&single)));
    }

    #[test]
    fn test_output_is_hex() {
        let digest = hash_single("anything");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_self_test_passes() {
        assert!(self_test().is_ok());
    }
}
