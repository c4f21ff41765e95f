//! Fuzz target for export CSV parsing.
//!
//! Any input either fails cleanly or parses into records that serialize
//! without panicking.

#![no_main]

use detbatch::ir::io_export_csv::from_export_csv_slice;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    if let Ok(records) = from_export_csv_slice(data) {
        for record in &records {
            let _ = format!("{record:?}");
        }
    }
});
