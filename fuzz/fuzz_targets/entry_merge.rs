#![no_main]

use libfuzzer_sys::fuzz_target;

use peersync_core::{AgentId, GroupTag, PartyId};
use peersync_state::{Entry, LocalAgent, PeerStore, QuorumMerge};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let (Ok(party), Ok(agent), Ok(group)) = (
        PartyId::new('A'),
        "A.2".parse::<AgentId>(),
        GroupTag::new('a'),
    ) else {
        return;
    };

    let merge = QuorumMerge::for_agent(LocalAgent::new(agent, [group]));
    let mut forward = PeerStore::new();
    let mut backward = PeerStore::new();
    forward.init_parties([party]);
    backward.init_parties([party]);

    let lines: Vec<&str> = text.lines().collect();
    for line in &lines {
        // parsing never fails and canonical text parses back to itself
        let entry = Entry::parse(line);
        assert_eq!(Entry::parse(&entry.canonical()).canonical(), entry.canonical());
        merge.merge(&mut forward, party, entry);
    }
    for line in lines.iter().rev() {
        merge.merge_text(&mut backward, party, line);
    }
    assert_eq!(forward.fingerprint(), backward.fingerprint());

    let again = forward.clone();
    for line in &lines {
        merge.merge_text(&mut forward, party, line);
    }
    assert_eq!(forward.fingerprint(), again.fingerprint());
});
