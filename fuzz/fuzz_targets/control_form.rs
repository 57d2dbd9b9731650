#![no_main]

use libfuzzer_sys::fuzz_target;
use querytap::control::ControlCommand;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Must never panic, whatever the request body holds
        let _ = ControlCommand::parse_form(input);
    }
});
