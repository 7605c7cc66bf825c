#![no_main]

use libfuzzer_sys::fuzz_target;

use peersync_log::{decode_lines, validate, Delta};

fuzz_target!(|data: &[u8]| {
    let _ = validate(data);
    let _ = Delta::new(data, vec![]);
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(delta) = Delta::from_json(text) {
            let _ = Delta::from_json(&delta.to_json());
        }
        let _ = decode_lines(text);
    }
});
