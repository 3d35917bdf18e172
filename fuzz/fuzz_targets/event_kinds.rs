#![no_main]

use libfuzzer_sys::fuzz_target;
use memtrace::filter::EventKindFilter;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(filter) = EventKindFilter::from_expr(input) {
            // An accepted expression always records at least one kind
            assert!(filter.kinds().next().is_some());
        }
    }
});
