//! Terminal output for the synchronizer
//!
//! Header and summary printing for interactive runs. The periodic
//! in-run statistics line is emitted by copy worker 0 through the
//! logging layer; this module only renders the bookends.

use std::time::Duration;

use console::style;
use humansize::{format_size, BINARY};

use crate::stats::StatsSnapshot;

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Format an elapsed duration as "1h02m03s" / "2m03s" / "4.2s"
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", elapsed.as_secs_f64())
    }
}

/// Print a header at the start of the run
pub fn print_header(source: &str, dest: &str, jobs: usize) {
    println!();
    println!(
        "{} {}",
        style("poolsync").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Source:").bold(), source);
    println!("  {} {}", style("Destination:").bold(), dest);
    println!("  {} {}", style("Workers:").bold(), jobs);
    println!();
}

/// Print a summary of the run results
pub fn print_summary(stats: &StatsSnapshot, duration: Duration, gc_reclaimed: Option<u64>) {
    let rate = if duration.as_secs_f64() > 0.0 {
        stats.files_copied as f64 / duration.as_secs_f64()
    } else {
        0.0
    };

    println!();
    println!("{}", style("Sync Complete").green().bold());
    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} {} ({})",
        style("Copied:").bold(),
        format_number(stats.files_copied),
        format_size(stats.bytes_copied, BINARY)
    );
    println!(
        "  {} {} ({})",
        style("Deduplicated:").bold(),
        format_number(stats.deduped_files),
        format_size(stats.deduped_bytes, BINARY)
    );
    println!(
        "  {} {} source / {} destination",
        style("Entries:").bold(),
        format_number(stats.src_entries),
        format_number(stats.dst_entries)
    );
    println!(
        "  {} {} ({:.0} files/sec)",
        style("Duration:").bold(),
        format_elapsed(duration),
        rate
    );
    if let Some(reclaimed) = gc_reclaimed {
        println!(
            "  {} {} pool entries reclaimed",
            style("GC:").bold(),
            format_number(reclaimed)
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
        assert_eq!(format_number(1234567890), "1,234,567,890");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(4200)), "4.2s");
        assert_eq!(format_elapsed(Duration::from_secs(123)), "2m03s");
        assert_eq!(format_elapsed(Duration::from_secs(3723)), "1h02m03s");
    }
}
