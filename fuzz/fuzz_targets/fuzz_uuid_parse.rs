//! Fuzz target: `BleUuid::parse`
//!
//! Feeds arbitrary strings to the UUID parser and asserts that it never
//! panics and that whatever it accepts renders back to a string it
//! accepts again as the same UUID.
//!
//! cargo fuzz run fuzz_uuid_parse

#![no_main]

use blectl::registry::BleUuid;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };
    if let Ok(uuid) = BleUuid::parse(text) {
        let rendered = uuid.to_string();
        assert_eq!(BleUuid::parse(&rendered), Ok(uuid));
    }
});
