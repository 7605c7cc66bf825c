//! DeltaLog - append-only history of one document

use std::sync::OnceLock;

use sha2::{Digest, Sha256};

use peersync_core::{SyncError, SyncResult, PEER_DID_PREFIX};

use crate::{Delta, DeltaSink};

/// Multihash code for SHA-256
const MULTIHASH_SHA2_256: u8 = 0x12;

/// How a document identity is derived from the genesis bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum IdentityScheme {
    /// `did:peer:1z` + base58btc(0x12 ‖ sha256(genesis))
    #[default]
    Base58Multihash,
    /// `did:peer:11-` + lowercase hex(sha256(genesis))
    LegacyHex,
}

impl IdentityScheme {
    pub fn derive(self, genesis: &[u8]) -> String {
        let digest = Sha256::digest(genesis);
        match self {
            IdentityScheme::Base58Multihash => {
                let mut prefixed = Vec::with_capacity(1 + digest.len());
                prefixed.push(MULTIHASH_SHA2_256);
                prefixed.extend_from_slice(&digest);
                format!("{PEER_DID_PREFIX}1z{}", bs58::encode(prefixed).into_string())
            }
            IdentityScheme::LegacyHex => format!("{PEER_DID_PREFIX}11-{}", hex::encode(digest)),
        }
    }
}

/// Ordered, append-only sequence of deltas; the first is the genesis.
#[derive(Debug, Default)]
pub struct DeltaLog {
    deltas: Vec<Delta>,
    scheme: IdentityScheme,
    identity: OnceLock<String>,
}

impl DeltaLog {
    pub fn new() -> Self {
        DeltaLog::default()
    }

    pub fn with_scheme(scheme: IdentityScheme) -> Self {
        DeltaLog {
            scheme,
            ..DeltaLog::default()
        }
    }

    /// Load every record a sink holds, in order
    pub fn from_sink(sink: &dyn DeltaSink, scheme: IdentityScheme) -> SyncResult<Self> {
        let mut log = DeltaLog::with_scheme(scheme);
        for delta in sink.read_all()? {
            log.append(delta)?;
        }
        Ok(log)
    }

    /// Add a delta at the end.
    ///
    /// Timestamps must be non-decreasing so that time-bounded replay can stop
    /// at the first delta past its bound.
    pub fn append(&mut self, delta: Delta) -> SyncResult<()> {
        if let Some(last) = self.deltas.last() {
            if delta.timestamp() < last.timestamp() {
                return Err(SyncError::OutOfOrder {
                    last: last.timestamp(),
                    attempted: delta.timestamp(),
                });
            }
        }
        tracing::debug!(hash = %delta.hash(), position = self.deltas.len(), "delta appended");
        self.deltas.push(delta);
        Ok(())
    }

    /// Append and hand the delta to a persistence sink
    pub fn append_to(&mut self, delta: Delta, sink: &mut dyn DeltaSink) -> SyncResult<()> {
        self.append(delta.clone())?;
        sink.append(&delta)
    }

    /// Install the genesis delta; only valid on an empty log
    pub fn set_genesis(&mut self, delta: Delta) -> SyncResult<()> {
        if !self.deltas.is_empty() {
            return Err(SyncError::GenesisAlreadySet);
        }
        self.append(delta)
    }

    pub fn genesis(&self) -> Option<&Delta> {
        self.deltas.first()
    }

    /// Decoded bytes of the genesis change
    pub fn genesis_document(&self) -> Option<Vec<u8>> {
        self.genesis().map(Delta::change_bytes)
    }

    /// Stable document identity; `None` until a genesis exists.
    pub fn identity(&self) -> Option<&str> {
        let genesis = self.genesis()?;
        let id = self
            .identity
            .get_or_init(|| self.scheme.derive(&genesis.change_bytes()));
        Some(id.as_str())
    }

    pub fn scheme(&self) -> IdentityScheme {
        self.scheme
    }

    /// Number of deltas, genesis included
    pub fn current_version(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn deltas(&self) -> &[Delta] {
        &self.deltas
    }

    pub fn iter(&self) -> impl Iterator<Item = &Delta> {
        self.deltas.iter()
    }
}
