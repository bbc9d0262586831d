#![no_main]

use dotpatch::metadata::ImageStore;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(assembly) = ImageStore::from_bytes(data) {
        let _ = ImageStore::to_bytes(&assembly);
    }
});
