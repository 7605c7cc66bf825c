//! Document repository - every known document log, keyed by identity

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use peersync_core::{DidRules, SyncError, SyncResult, Timestamp, ValidationError};

use crate::{validate, validate_value, Delta, DeltaLog, Document, DocumentResolver, IdentityScheme};

/// Repository of document logs
pub struct DocumentRepo {
    rules: Arc<dyn DidRules>,
    scheme: IdentityScheme,
    logs: BTreeMap<String, DeltaLog>,
    resolver: DocumentResolver,
}

impl DocumentRepo {
    pub fn new(rules: Arc<dyn DidRules>) -> Self {
        Self::with_scheme(rules, IdentityScheme::default())
    }

    pub fn with_scheme(rules: Arc<dyn DidRules>, scheme: IdentityScheme) -> Self {
        DocumentRepo {
            rules,
            scheme,
            logs: BTreeMap::new(),
            resolver: DocumentResolver::new(),
        }
    }

    /// Validate a genesis document, start its log, and return its identity
    pub fn new_document(&mut self, genesis: &[u8], authors: Vec<String>) -> SyncResult<String> {
        validate(genesis)?;
        let mut log = DeltaLog::with_scheme(self.scheme);
        log.set_genesis(Delta::new(genesis, authors)?)?;
        let did = log.identity().ok_or(SyncError::NoGenesis)?.to_string();
        tracing::info!(%did, "document created");
        self.logs.entry(did.clone()).or_insert(log);
        Ok(did)
    }

    pub fn append(&mut self, did: &str, delta: Delta) -> SyncResult<()> {
        self.logs
            .get_mut(did)
            .ok_or_else(|| SyncError::UnknownDocument(did.to_string()))?
            .append(delta)
    }

    pub fn log(&self, did: &str) -> Option<&DeltaLog> {
        self.logs.get(did)
    }

    /// Identities in the collaborator's canonical order
    pub fn dids(&self) -> Vec<&str> {
        let mut dids: Vec<&str> = self.logs.keys().map(String::as_str).collect();
        dids.sort_by(|a, b| self.rules.compare(a, b));
        dids
    }

    /// Resolve a DID. Invalid or unknown DIDs resolve to `None`; reserved
    /// sentinels resolve to the fixed document [`predefined`] picks.
    pub fn resolve(&self, did: &str, as_of: Option<Timestamp>) -> SyncResult<Option<Document>> {
        if !self.rules.is_valid(did) {
            return Ok(None);
        }
        if self.rules.is_reserved(did) {
            return predefined(did);
        }
        match self.logs.get(did) {
            Some(log) => self.resolver.resolve(log, as_of),
            None => Ok(None),
        }
    }
}

const PREDEFINED_RSA_PEM: &str = "-----BEGIN PUBLIC KEY-----\r\n\
MIICIjANBgkqhkiG9w0BAQEFAAOCAg8AMIICCgKCAgEAoZp7md4nkmmFvkoHhQMw\r\n\
N0lcpYeKfeinKir7zYWFLmpClZHawZKLkB52+nnY4w9ZlKhc4Yosrw/N0h1sZlVZ\r\n\
fOQBnzFUQCea6uK/4BKHPhiHpN73uOwu5TAY4BHS7fsXRLPgQFB6o6iy127o2Jfb\r\n\
UVpbNU/rJGxVI2K1BIzkfrXAJ0pkjkdP7OFE6yRLU4ZcATWSIPwGvlF6a0/QPC3B\r\n\
bTvp2+DYPDC4pKWxNF/qOwOnMWqxGq6ookn12N/GufA/Ugv3BTVoy7I7Q9SXty4u\r\n\
Uat19OBJVIqBOMgXsyDz0x/C6lhBR2uQ1K06XRa8N4hbfcgkSs+yNBkLfBl7N80Q\r\n\
0Wkq2PHetzQU12dPnz64vvr6s0rpYIo20VtLzhYA8ZxseGc3s7zmY5QWYx3ek7Vu\r\n\
wPv9QQzcmtIQQsUbekPoLnKLt6wJhPIGEr4tPXy8bmbaThRMx4tjyEQYy6d+uD0h\r\n\
XTLSjZ1SccMRqLxoPtTWVNXKY1E84EcS/QkqlY4AthLFBL6r+lnm+DlNaG8LMwCm\r\n\
cz5NMag9ooM9IqgdDYhUpWYDSdOvDubtz1YZ4hjQhaofdC2AkPXRiQvMy/Nx9WjQ\r\n\
n4z387kz5PK5YbadoZYkwtFttmxJ/EQkkhGEDTXoSRTufv+qjXDsmhEsdaNkvcDP\r\n\
1uiCSY19UWe5LQhIMbR0u/0CAwEAAQ==\r\n\
-----END PUBLIC KEY-----";

/// Fixed document for a reserved sentinel DID, chosen by the repeated
/// suffix character (case-insensitive):
/// - `0`-`4` and `d`: a three-key template carrying `did` as its `id`
/// - `e`: an empty document with no keys
/// - `c`: a document that fails validation
///
/// Any other sentinel has no document.
pub fn predefined(did: &str) -> SyncResult<Option<Document>> {
    let which = did.chars().last().map(|c| c.to_ascii_lowercase());
    let doc = match which {
        Some('0'..='4' | 'd') => json!({
            "@context": "https://w3id.org/did/v0.11",
            "id": did,
            "service": [{
                "type": "did-communication",
                "serviceEndpoint": "https://localhost:12345"
            }],
            "publicKey": [
                {
                    "id": "key-1",
                    "type": "Ed25519VerificationKey2018",
                    "publicKeyBase58": "GBMBzuhw7XgSdbNffh8HpoKWEdEN6hU2Q5WqL1KQTG5Z"
                },
                {
                    "id": "key-3",
                    "type": "Secp256k1VerificationKey2018",
                    "controller": "#id",
                    "publicKeyHex": "3056301006072a8648ce3d020106052b8104000a03420004a34521c8191d625ff811c82a24a60ff9f174c8b17a7550c11bba35dbf97f3f04392e6a9c6353fd07987e016122157bf56c487865036722e4a978bb6cd8843fa8"
                },
                {
                    "id": "key-5",
                    "type": "RsaVerificationKey2018",
                    "controller": "#id",
                    "publicKeyPem": PREDEFINED_RSA_PEM
                }
            ],
            "authentication": ["#key-1", "#key-3", "#key-5"]
        }),
        Some('e') => json!({
            "@context": "https://w3id.org/did/v0.11",
            "service": [],
            "publicKey": [],
            "authentication": []
        }),
        Some('c') => {
            return Err(ValidationError::InvalidJson("invalid DID doc".into()).into());
        }
        _ => return Ok(None),
    };
    Ok(Some(validate_value(doc)?))
}
