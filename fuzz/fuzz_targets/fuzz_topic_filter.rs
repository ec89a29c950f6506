//! Fuzz target: topic validation and matching
//!
//! Splits the input into a filter and a topic and checks that matching
//! never panics and that any valid topic name matches itself.
//!
//! cargo fuzz run fuzz_topic_filter

#![no_main]

use libfuzzer_sys::fuzz_target;
use securelink::app::topics;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };
    let (filter, topic) = text.split_once('\n').unwrap_or((text, text));

    if topics::validate_filter(filter).is_ok() && topics::validate_topic_name(topic).is_ok() {
        let _ = topics::matches(filter, topic);
    }
    if topics::validate_topic_name(topic).is_ok() {
        assert!(topics::matches(topic, topic));
    }
});
