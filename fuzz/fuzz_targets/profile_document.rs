#![no_main]

use libfuzzer_sys::fuzz_target;
use memtrace::profile::ProfileDocument;

fuzz_target!(|data: &[u8]| {
    let _ = serde_json::from_slice::<ProfileDocument>(data);
});
