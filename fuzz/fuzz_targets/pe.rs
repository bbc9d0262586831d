#![no_main]

use dotpatch::metadata::PeStore;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(assembly) = PeStore::from_bytes(data) {
        let _ = PeStore::to_bytes(&assembly);
    }
});
