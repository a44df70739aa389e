//! Privacy capability consumed by the collector and the scorer
//!
//! Cryptographic primitives live outside this crate; [`PrivacyGuard`] is the
//! seam. The bundled [`PseudonymizingGuard`] hashes subject ids and strips
//! personal payload keys but cannot encrypt anything beyond public data.

use crate::types::Event;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Payload keys that never reach the event store
pub const PERSONAL_KEYS: &[&str] = &[
    "email",
    "phone",
    "name",
    "fullName",
    "address",
    "ip",
    "ipAddress",
    "password",
    "token",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrivacyError {
    #[error("no cipher available for {0:?} data")]
    Unsupported(DataClassification),

    #[error("ciphertext rejected: {0}")]
    InvalidCiphertext(String),
}

/// Trimmed subject id, None when blank
///
/// Every path that derives a subject key goes through this first, so
/// `" alice"` and `"alice"` share a key.
pub fn normalize_subject_id(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Sensitivity of a blob handed to the guard
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DataClassification {
    Public,
    Internal,
    Personal,
    Sensitive,
}

/// Black-box privacy operations
pub trait PrivacyGuard: Send + Sync {
    fn encrypt(&self, data: &[u8], class: DataClassification) -> Result<Vec<u8>, PrivacyError>;

    fn decrypt(&self, data: &[u8], class: DataClassification) -> Result<Vec<u8>, PrivacyError>;

    /// Prepare an accepted event for storage
    fn anonymize(&self, event: Event) -> Event;

    /// Stable storage key for a subject id
    ///
    /// Must be deterministic: the scorer looks subjects up with the same key
    /// the collector stored them under.
    fn subject_key(&self, subject_id: &str) -> String;
}

/// Salted SHA-256 pseudonymization, no encryption
#[derive(Debug, Clone)]
pub struct PseudonymizingGuard {
    salt: String,
    pseudonymize: bool,
}

impl PseudonymizingGuard {
    pub fn new(salt: impl Into<String>, pseudonymize: bool) -> Self {
        Self {
            salt: salt.into(),
            pseudonymize,
        }
    }

    fn digest(&self, subject_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(b":");
        hasher.update(subject_id.as_bytes());
        hasher
            .finalize()
            .iter()
            .take(8)
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl PrivacyGuard for PseudonymizingGuard {
    fn encrypt(&self, data: &[u8], class: DataClassification) -> Result<Vec<u8>, PrivacyError> {
        match class {
            DataClassification::Public => Ok(data.to_vec()),
            other => Err(PrivacyError::Unsupported(other)),
        }
    }

    fn decrypt(&self, data: &[u8], class: DataClassification) -> Result<Vec<u8>, PrivacyError> {
        match class {
            DataClassification::Public => Ok(data.to_vec()),
            other => Err(PrivacyError::Unsupported(other)),
        }
    }

    fn anonymize(&self, mut event: Event) -> Event {
        event.subject_id = event
            .subject_id
            .as_deref()
            .and_then(normalize_subject_id)
            .map(|id| self.subject_key(id));
        event
            .payload
            .retain(|key, _| !PERSONAL_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key)));
        event
    }

    fn subject_key(&self, subject_id: &str) -> String {
        let subject_id = subject_id.trim();
        if self.pseudonymize {
            self.digest(subject_id)
        } else {
            subject_id.to_string()
        }
    }
}
