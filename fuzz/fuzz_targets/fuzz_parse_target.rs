#![no_main]

use libfuzzer_sys::fuzz_target;
use plugin_channel::connection::{DialSettings, Target};

fuzz_target!(|data: &[u8]| {
    let Ok(address) = std::str::from_utf8(data) else {
        return;
    };
    // Parsing and endpoint construction must never panic.
    if let Ok(target) = Target::parse(address) {
        let _ = target.is_loopback();
        let _ = DialSettings::default().endpoint(&target);
    }
});
