#![no_main]

use handoff::environment::{escape_property, redact, workflow_command};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // A message can never break out of its command line.
    let line = workflow_command("warning", &[("title", text)], text);
    assert!(!line.contains('\n') && !line.contains('\r'));
    assert!(!escape_property(text).contains(','));

    if !text.is_empty() {
        assert_eq!(redact(text, &[text.to_string()]), "***");
    }
});
