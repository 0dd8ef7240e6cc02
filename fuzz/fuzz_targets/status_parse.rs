//! Fuzz target for UA status JSON parsing.
//!
//! Arbitrary bytes must either parse into a status with unique, non-empty
//! service names or fail with an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::collections::HashSet;
use ua_daemon::Status;

fuzz_target!(|data: &[u8]| {
    if let Ok(status) = Status::parse(data) {
        let mut names = HashSet::new();
        for service in &status.services {
            assert!(!service.name.is_empty());
            assert!(names.insert(service.name.as_str()));
        }
        assert!(status.last_refresh.is_none());
    }
});
