//! Persistence sink contract
//!
//! Durable storage belongs to the host. The core only needs an ordered
//! append / read-back pair, plus a line codec hosts can reuse.

use peersync_core::SyncResult;

use crate::Delta;

/// Ordered record store supplied by the host
pub trait DeltaSink {
    fn append(&mut self, delta: &Delta) -> SyncResult<()>;

    fn read_all(&self) -> SyncResult<Vec<Delta>>;
}

/// In-memory sink
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Vec<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    /// Raw encoded lines, in append order
    pub fn lines(&self) -> &[String] {
        &self.records
    }
}

impl DeltaSink for MemorySink {
    fn append(&mut self, delta: &Delta) -> SyncResult<()> {
        self.records.push(delta.to_json());
        Ok(())
    }

    fn read_all(&self) -> SyncResult<Vec<Delta>> {
        self.records.iter().map(|line| Delta::from_json(line)).collect()
    }
}

/// One JSON object per line
pub fn encode_lines<'a>(deltas: impl IntoIterator<Item = &'a Delta>) -> String {
    let mut out = String::new();
    for d in deltas {
        out.push_str(&d.to_json());
        out.push('\n');
    }
    out
}

/// Decode lines written by [`encode_lines`]; lines that are not a JSON
/// object are skipped.
pub fn decode_lines(text: &str) -> SyncResult<Vec<Delta>> {
    text.lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{') && line.ends_with('}'))
        .map(Delta::from_json)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeltaLog, IdentityScheme};
    use peersync_core::Timestamp;

    #[test]
    fn test_memory_sink_reload() {
        let mut sink = MemorySink::new();
        let mut log = DeltaLog::new();
        log.append_to(Delta::at("{}", vec![], Timestamp::from_millis(1)).unwrap(), &mut sink)
            .unwrap();
        log.append_to(
            Delta::at(r#"{"rules":[]}"#, vec!["key-1".into()], Timestamp::from_millis(2)).unwrap(),
            &mut sink,
        )
        .unwrap();
        assert_eq!(sink.lines().len(), 2);

        let reloaded = DeltaLog::from_sink(&sink, IdentityScheme::default()).unwrap();
        assert_eq!(reloaded.identity(), log.identity());
        assert_eq!(reloaded.deltas(), log.deltas());
    }

    #[test]
    fn test_line_codec_skips_noise() {
        let a = Delta::at("{}", vec![], Timestamp::from_millis(1)).unwrap();
        let b = Delta::at(r#"{"x":1}"#, vec![], Timestamp::from_millis(2)).unwrap();
        let mut text = encode_lines([&a, &b]);
        text.insert_str(0, "# header\n\n");
        let decoded = decode_lines(&text).unwrap();
        assert_eq!(decoded, vec![a, b]);
    }
}
