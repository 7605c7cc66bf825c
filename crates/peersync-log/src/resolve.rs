//! Document resolution - replay a delta log into a materialized document
//!
//! The genesis change is the initial document. Every later delta is a
//! structured patch:
//! - `deleted`: ids removed from `publicKey`, `authentication` and
//!   `authorization.profiles`, then appended to the document's own
//!   `deleted` list
//! - `publicKey`: keys appended, with their references added to
//!   `authentication` and any `authorization.profiles` carried along
//! - `rules` / `authorization.rules`: appended to the matching list

use serde_json::{Map, Value};

use peersync_core::{SyncResult, Timestamp};

use crate::{validate, Delta, DeltaLog, Document};

/// Deterministic replay engine
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentResolver;

impl DocumentResolver {
    pub fn new() -> Self {
        DocumentResolver
    }

    /// Replay `log`, optionally stopping at the first delta newer than `as_of`.
    ///
    /// Returns `Ok(None)` for a log without genesis.
    pub fn resolve(&self, log: &DeltaLog, as_of: Option<Timestamp>) -> SyncResult<Option<Document>> {
        let (Some(genesis), Some(identity)) = (log.genesis(), log.identity()) else {
            return Ok(None);
        };
        let mut doc = validate(&genesis.change_bytes())?;

        for delta in log.iter().skip(1) {
            if as_of.is_some_and(|bound| delta.timestamp() > bound) {
                break;
            }
            self.apply(&mut doc, delta)?;
        }

        doc.insert("id".into(), Value::String(identity.to_string()));
        Ok(Some(doc))
    }

    /// Apply one patch delta in place
    pub fn apply(&self, doc: &mut Document, delta: &Delta) -> SyncResult<()> {
        let Value::Object(patch) = delta.change_json()? else {
            tracing::warn!(hash = %delta.hash(), "patch is not an object; skipped");
            return Ok(());
        };

        let deleted: Vec<&str> = list(&patch, "deleted").iter().filter_map(Value::as_str).collect();
        for id in &deleted {
            remove_everywhere(doc, id);
        }
        if !deleted.is_empty() {
            extend(doc, "deleted", deleted.iter().map(|id| Value::String(id.to_string())));
        }

        let keys = list(&patch, "publicKey");
        if !keys.is_empty() {
            extend(doc, "publicKey", keys.iter().cloned());

            let auth = list(&patch, "authentication");
            if auth.is_empty() {
                let refs = keys
                    .iter()
                    .filter_map(key_id)
                    .map(|id| Value::String(format!("#{id}")));
                extend(doc, "authentication", refs);
            } else {
                extend(doc, "authentication", auth.iter().cloned());
            }

            if let Some(Value::Object(authz)) = patch.get("authorization") {
                let profiles = list(authz, "profiles");
                if !profiles.is_empty() {
                    extend_authorization(doc, "profiles", profiles.iter().cloned());
                }
            }
        }

        let rules = list(&patch, "rules");
        if !rules.is_empty() {
            extend(doc, "rules", rules.iter().cloned());
        }
        if let Some(Value::Object(authz)) = patch.get("authorization") {
            let rules = list(authz, "rules");
            if !rules.is_empty() {
                extend_authorization(doc, "rules", rules.iter().cloned());
            }
        }
        Ok(())
    }
}

fn list<'a>(map: &'a Map<String, Value>, name: &str) -> &'a [Value] {
    map.get(name)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn key_id(value: &Value) -> Option<&str> {
    value.get("id").and_then(Value::as_str)
}

/// Matches `id`, `#id`, or an object whose `id` is either
fn refers_to(value: &Value, id: &str) -> bool {
    let matches = |s: &str| s == id || s.strip_prefix('#') == Some(id);
    match value {
        Value::String(s) => matches(s),
        other => key_id(other).is_some_and(matches),
    }
}

fn extend(map: &mut Map<String, Value>, name: &str, items: impl Iterator<Item = Value>) {
    let entry = map
        .entry(name.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !entry.is_array() {
        *entry = Value::Array(Vec::new());
    }
    if let Value::Array(existing) = entry {
        existing.extend(items);
    }
}

fn extend_authorization(doc: &mut Document, name: &str, items: impl Iterator<Item = Value>) {
    let entry = doc
        .entry("authorization".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(authz) = entry {
        extend(authz, name, items);
    }
}

fn remove_everywhere(doc: &mut Document, id: &str) {
    if let Some(Value::Array(keys)) = doc.get_mut("publicKey") {
        keys.retain(|k| !refers_to(k, id));
    }
    if let Some(Value::Array(auth)) = doc.get_mut("authentication") {
        auth.retain(|a| !refers_to(a, id));
    }
    if let Some(Value::Array(profiles)) = doc
        .get_mut("authorization")
        .and_then(|a| a.get_mut("profiles"))
    {
        profiles.retain(|p| !refers_to(p, id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(change: Value, millis: i64) -> Delta {
        Delta::at(change.to_string(), vec![], Timestamp::from_millis(millis)).unwrap()
    }

    fn genesis() -> Value {
        json!({
            "@context": "https://w3id.org/did/v0.11",
            "publicKey": [{"id": "key-1", "type": "Ed25519VerificationKey2018"}],
            "authentication": ["#key-1"],
            "authorization": {"profiles": [{"id": "key-1", "roles": ["edge"]}]}
        })
    }

    #[test]
    fn test_no_genesis_is_no_document() {
        let log = DeltaLog::new();
        assert!(DocumentResolver::new().resolve(&log, None).unwrap().is_none());
    }

    #[test]
    fn test_genesis_only_gets_id() {
        let mut log = DeltaLog::new();
        log.append(at(genesis(), 0)).unwrap();
        let doc = DocumentResolver::new().resolve(&log, None).unwrap().unwrap();
        assert_eq!(doc["id"], json!(log.identity().unwrap()));
        assert_eq!(doc["publicKey"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_add_key_then_delete() {
        let mut log = DeltaLog::new();
        log.append(at(genesis(), 0)).unwrap();
        log.append(at(
            json!({
                "publicKey": [{"id": "key-2", "type": "Ed25519VerificationKey2018"}],
                "authorization": {"profiles": [{"id": "key-2", "roles": ["cloud"]}]}
            }),
            10,
        ))
        .unwrap();
        log.append(at(json!({"deleted": ["key-1"]}), 20)).unwrap();

        let doc = DocumentResolver::new().resolve(&log, None).unwrap().unwrap();
        assert_eq!(doc["publicKey"], json!([{"id": "key-2", "type": "Ed25519VerificationKey2018"}]));
        assert_eq!(doc["authentication"], json!(["#key-2"]));
        assert_eq!(doc["authorization"]["profiles"], json!([{"id": "key-2", "roles": ["cloud"]}]));
        assert_eq!(doc["deleted"], json!(["key-1"]));
    }

    #[test]
    fn test_deletions_accumulate_in_order() {
        let mut log = DeltaLog::new();
        log.append(at(genesis(), 0)).unwrap();
        log.append(at(json!({"publicKey": [{"id": "key-2"}]}), 1)).unwrap();
        log.append(at(json!({"deleted": ["key-2"]}), 2)).unwrap();
        log.append(at(json!({"deleted": ["key-1", 7]}), 3)).unwrap();

        let resolver = DocumentResolver::new();
        let doc = resolver.resolve(&log, None).unwrap().unwrap();
        assert_eq!(doc["deleted"], json!(["key-2", "key-1"]));
        assert_eq!(doc["publicKey"], json!([]));

        let before = resolver
            .resolve(&log, Some(Timestamp::from_millis(1)))
            .unwrap()
            .unwrap();
        assert!(before.get("deleted").is_none());
    }

    #[test]
    fn test_explicit_authentication_reference() {
        let mut log = DeltaLog::new();
        log.append(at(genesis(), 0)).unwrap();
        log.append(at(
            json!({"publicKey": [{"id": "key-9"}], "authentication": ["did:x#key-9"]}),
            1,
        ))
        .unwrap();
        let doc = DocumentResolver::new().resolve(&log, None).unwrap().unwrap();
        assert_eq!(doc["authentication"], json!(["#key-1", "did:x#key-9"]));
    }

    #[test]
    fn test_rules_appended() {
        let mut log = DeltaLog::new();
        log.append(at(json!({}), 0)).unwrap();
        log.append(at(json!({"rules": [{"grant": ["register"]}]}), 1)).unwrap();
        log.append(at(json!({"authorization": {"rules": [{"grant": ["route"]}]}}), 2))
            .unwrap();
        let doc = DocumentResolver::new().resolve(&log, None).unwrap().unwrap();
        assert_eq!(doc["rules"], json!([{"grant": ["register"]}]));
        assert_eq!(doc["authorization"]["rules"], json!([{"grant": ["route"]}]));
    }

    #[test]
    fn test_delete_missing_id_is_noop() {
        let mut log = DeltaLog::new();
        log.append(at(json!({"service": []}), 0)).unwrap();
        log.append(at(json!({"deleted": ["key-404"]}), 1)).unwrap();
        let doc = DocumentResolver::new().resolve(&log, None).unwrap().unwrap();
        assert!(doc.get("publicKey").is_none());
        assert_eq!(doc["deleted"], json!(["key-404"]));
    }

    #[test]
    fn test_as_of_stops_replay() {
        let mut log = DeltaLog::new();
        log.append(at(genesis(), 0)).unwrap();
        log.append(at(json!({"publicKey": [{"id": "key-2"}]}), 100)).unwrap();
        log.append(at(json!({"publicKey": [{"id": "key-3"}]}), 200)).unwrap();

        let resolver = DocumentResolver::new();
        let early = resolver
            .resolve(&log, Some(Timestamp::from_millis(150)))
            .unwrap()
            .unwrap();
        assert_eq!(early["publicKey"].as_array().unwrap().len(), 2);

        let genesis_only = resolver
            .resolve(&log, Some(Timestamp::from_millis(50)))
            .unwrap()
            .unwrap();
        assert_eq!(genesis_only["publicKey"].as_array().unwrap().len(), 1);
        assert_eq!(genesis_only["id"], early["id"]);
    }

    #[test]
    fn test_invalid_genesis_is_validation_error() {
        let mut log = DeltaLog::new();
        log.append(Delta::new(r#"{"publicKey": 3}"#, vec![]).unwrap()).unwrap();
        let err = DocumentResolver::new().resolve(&log, None).unwrap_err();
        assert!(matches!(err, peersync_core::SyncError::Validation(_)));
    }
}
