//! Delta - immutable, content-addressed change record

use std::fmt;
use std::hash::{Hash, Hasher};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use peersync_core::{SyncError, SyncResult, Timestamp};

/// A single change to a document.
///
/// The change is held as canonical base64 text; `hash` is the lowercase hex
/// SHA-256 of the decoded bytes. Equality and hashing look at `hash` only.
#[derive(Clone)]
pub struct Delta {
    change: String,
    authors: Vec<String>,
    timestamp: Timestamp,
    hash: String,
}

/// Wire form: one JSON object per delta
#[derive(Serialize, Deserialize)]
struct DeltaRecord {
    change: String,
    by: Vec<String>,
    when: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
}

/// True when the first non-whitespace byte opens a JSON object
pub fn seems_like_json(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .find(|b| !matches!(b, b'\r' | b'\n' | b'\t' | b' '))
        .map_or(false, |b| *b == b'{')
}

/// Hex SHA-256
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl Delta {
    /// Build a delta stamped with the current time.
    ///
    /// `change` may be JSON (text or bytes) or base64 (text or bytes).
    pub fn new(change: impl AsRef<[u8]>, authors: Vec<String>) -> SyncResult<Self> {
        Self::at(change, authors, Timestamp::now())
    }

    pub fn at(change: impl AsRef<[u8]>, authors: Vec<String>, timestamp: Timestamp) -> SyncResult<Self> {
        let raw = change.as_ref();
        let bytes = if seems_like_json(raw) {
            raw.to_vec()
        } else {
            let text = std::str::from_utf8(raw)
                .map_err(|_| SyncError::Codec("change is neither JSON nor base64 text".into()))?;
            STANDARD
                .decode(text.trim())
                .map_err(|e| SyncError::Codec(format!("change is not base64: {e}")))?
        };
        Ok(Self::from_bytes(&bytes, authors, timestamp))
    }

    fn from_bytes(bytes: &[u8], authors: Vec<String>, timestamp: Timestamp) -> Self {
        Delta {
            change: STANDARD.encode(bytes),
            authors,
            timestamp,
            hash: content_hash(bytes),
        }
    }

    /// Canonical base64 form of the change
    pub fn change(&self) -> &str {
        &self.change
    }

    pub fn authors(&self) -> &[String] {
        &self.authors
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Decoded change bytes
    pub fn change_bytes(&self) -> Vec<u8> {
        // `change` is produced by our own encoder, so decoding cannot fail
        STANDARD.decode(&self.change).unwrap_or_default()
    }

    pub fn change_text(&self) -> SyncResult<String> {
        String::from_utf8(self.change_bytes())
            .map_err(|_| SyncError::Codec("change is not UTF-8".into()))
    }

    pub fn change_json(&self) -> SyncResult<serde_json::Value> {
        serde_json::from_slice(&self.change_bytes())
            .map_err(|e| SyncError::Codec(format!("change is not JSON: {e}")))
    }

    pub fn to_json(&self) -> String {
        let record = DeltaRecord {
            change: self.change.clone(),
            by: self.authors.clone(),
            when: self.timestamp,
            hash: Some(self.hash.clone()),
        };
        // A struct of strings always serializes
        serde_json::to_string(&record).unwrap_or_default()
    }

    /// Decode a record, recomputing the hash and checking any stored one
    pub fn from_json(text: &str) -> SyncResult<Self> {
        let record: DeltaRecord =
            serde_json::from_str(text).map_err(|e| SyncError::Codec(e.to_string()))?;
        let delta = Delta::at(record.change.as_bytes(), record.by, record.when)?;
        match record.hash {
            Some(stored) if stored != delta.hash => Err(SyncError::Codec(format!(
                "hash mismatch: stored {stored}, computed {}",
                delta.hash
            ))),
            _ => Ok(delta),
        }
    }
}

impl PartialEq for Delta {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Delta {}

impl Hash for Delta {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Debug for Delta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delta")
            .field("hash", &&self.hash[..12])
            .field("authors", &self.authors)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Delta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}
