#![no_main]
use libfuzzer_sys::fuzz_target;
use gosh_offline::engine::parse_notification;

fuzz_target!(|data: &str| {
    // Arbitrary WebSocket frames must never panic, and every event names a GID
    for event in parse_notification(data) {
        assert!(!event.gid.is_empty());
    }
});
