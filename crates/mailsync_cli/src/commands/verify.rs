//! Verify command implementation.

use super::format_size;
use mailsync_storage::FileBackend;
use mailsync_store::{verify_medium, VerifyReport};
use std::path::Path;

/// Runs the verify command. The file is read, never changed.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !path.is_file() {
        return Err(format!("No account store found at {}", path.display()).into());
    }
    println!("Verifying store at {}", path.display());
    println!();

    let backend = FileBackend::open_existing(path)?;
    let report = verify_medium(&backend)?;
    print_report(&report);

    println!();
    if report.is_clean() {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ Store verification failed (run `recover` to cut the log back)");
        Err("Verification failed".into())
    }
}

fn print_report(report: &VerifyReport) {
    println!(
        "  Frames: {}, valid bytes: {} of {}",
        report.frames,
        format_size(report.valid_bytes),
        format_size(report.total_bytes)
    );
    if let Some(offset) = report.torn_tail {
        println!(
            "    Incomplete frame at offset {offset}: {} bytes",
            report.total_bytes - offset
        );
    }
    if let Some(corruption) = &report.corruption {
        println!("    ERROR: {corruption}");
    }
}
