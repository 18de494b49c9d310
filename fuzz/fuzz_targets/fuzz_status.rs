#![no_main]
use libfuzzer_sys::fuzz_target;
use gosh_offline::protocol::{parse_count, StatusInfo};

fuzz_target!(|data: &[u8]| {
    // Malformed counters read as zero instead of panicking
    if let Ok(status) = serde_json::from_slice::<StatusInfo>(data) {
        let _ = parse_count(&status.total_length);
        let _ = parse_count(&status.completed_length);
        let _ = parse_count(&status.download_speed);
        let _ = status.redirect_target();
        let _ = status.primary_path();
    }
});
