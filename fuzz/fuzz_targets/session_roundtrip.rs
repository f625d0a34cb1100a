#![no_main]

use handoff::cleanup::CleanupPlan;
use handoff::types::{Session, release_tag};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(session) = serde_json::from_slice::<Session>(data) {
        let json = serde_json::to_vec(&session).expect("serialize");
        let parsed: Session = serde_json::from_slice(&json).expect("reparse");
        assert_eq!(session, parsed);
        assert_eq!(
            session.tag(),
            release_tag(session.release_prefix.as_deref(), &session.version)
        );
    }

    if let Ok(plan) = serde_json::from_slice::<CleanupPlan>(data) {
        let json = serde_json::to_vec(&plan).expect("serialize");
        let parsed: CleanupPlan = serde_json::from_slice(&json).expect("reparse");
        assert_eq!(plan, parsed);
    }
});
