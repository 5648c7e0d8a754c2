//! Account credentials, device fingerprints, and login verification
//!
//! Passwords are stored as depth-two hashes, hardware fingerprints and
//! recovery words as depth-one hashes of the individual values. Login binds
//! an account to its registered device with a 2-of-3 fingerprint match;
//! recovery words are the fallback credential when the device changed.

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::persistence::AccountRecord;

/// Hardware identifiers as supplied by a client. Absent fields default to
/// the empty string, which also covers clients that never send hardware at
/// all during registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareInfo {
    #[serde(default)]
    pub cpu_id: String,
    #[serde(default)]
    pub ram_id: String,
    #[serde(default)]
    pub disk_serial: String,
}

/// Stored fingerprint hashes for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprints {
    pub cpu: String,
    pub ram: String,
    pub disk: String,
}

/// Number of fingerprint matches required to trust the device.
const FINGERPRINT_THRESHOLD: usize = 2;

impl Fingerprints {
    /// Hash a client's hardware identifiers for storage. `None` hashes the
    /// empty identifiers, matching registrations that carried no hardware.
    pub fn from_hardware(hardware: Option<&HardwareInfo>) -> Self {
        let default = HardwareInfo::default();
        let hw = hardware.unwrap_or(&default);
        Fingerprints {
            cpu: crypto::hash_single(&hw.cpu_id),
            ram: crypto::hash_single(&hw.ram_id),
            disk: crypto::hash_single(&hw.disk_serial),
        }
    }

    /// Count how many of the client's current identifiers hash to the
    /// stored values.
    pub fn matches(&self, hardware: &HardwareInfo) -> usize {
        [
            crypto::hash_single(&hardware.cpu_id) == self.cpu,
            crypto::hash_single(&hardware.ram_id) == self.ram,
            crypto::hash_single(&hardware.disk_serial) == self.disk,
        ]
        .iter()
        .filter(|&&matched| matched)
        .count()
    }
}

pub fn hash_password(password: &str) -> String {
    crypto::hash_double(password)
}

/// Hash recovery words individually, preserving order.
pub fn hash_words(words: &[String]) -> Vec<String> {
    words.iter().map(|word| crypto::hash_single(word)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Success,
    BadPassword,
    /// Device changed and no recovery words were supplied. Clients prompt
    /// differently on this signal than on a wrong password.
    HardwareMismatch,
    BadRecoveryWords,
}

/// Verify a login attempt against the stored account. An absent hardware
/// payload skips the device check entirely: password alone decides.
pub fn verify_login(
    account: &AccountRecord,
    password: &str,
    words: Option<&[String]>,
    hardware: Option<&HardwareInfo>,
) -> LoginOutcome {
    if hash_password(password) != account.password_hash {
        return LoginOutcome::BadPassword;
    }

    let hardware = match hardware {
        Some(hw) => hw,
        None => return LoginOutcome::Success,
    };

    let stored = Fingerprints {
        cpu: account.cpu_hash.clone(),
        ram: account.ram_hash.clone(),
        disk: account.disk_hash.clone(),
    };
    if stored.matches(hardware) >= FINGERPRINT_THRESHOLD {
        return LoginOutcome::Success;
    }

    match words {
        None => LoginOutcome::HardwareMismatch,
        Some(supplied) if hash_words(supplied) == account.word_hashes => LoginOutcome::Success,
        Some(_) => LoginOutcome::BadRecoveryWords,
    }
}
