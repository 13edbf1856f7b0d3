//! Index statistics and folder overview.
//!
//! Provides a quick summary of what's indexed: document and chunk counts,
//! embedding coverage, and per-folder breakdowns. Used by `docket stats` and
//! `docket folders`.

use chrono::{DateTime, Utc};

use crate::folders::FolderSummary;
use crate::indexer::IndexStats;

/// Print the stats summary and per-folder table.
pub fn print_stats(stats: &IndexStats, folders: &[FolderSummary]) {
    println!("Docket Index Stats");
    println!("==================");
    println!();
    println!("  Index:       {}", stats.index_root.display());
    println!("  Size:        {}", format_bytes(stats.disk_bytes));
    println!("  Model:       {} ({} dims)", stats.embedding_model, stats.dims);
    println!();
    println!("  Documents:   {}", stats.total_documents);
    println!("  Chunks:      {}", stats.total_chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.embedded_chunks,
        stats.total_chunks,
        if stats.total_chunks > 0 {
            (stats.embedded_chunks * 100) / stats.total_chunks
        } else {
            0
        }
    );
    if stats.lexical_only_chunks > 0 {
        println!("  Lexical-only: {}", stats.lexical_only_chunks);
    }

    if !folders.is_empty() {
        println!();
        println!("  By folder:");
        print_folder_table(folders);
    }

    println!();
}

/// Print the folder registry as a table.
pub fn print_folders(folders: &[FolderSummary]) {
    if folders.is_empty() {
        println!("No folders indexed.");
        return;
    }
    print_folder_table(folders);
}

fn print_folder_table(folders: &[FolderSummary]) {
    let now = Utc::now();
    println!("  {:<48} {:>6}   {}", "FOLDER", "DOCS", "LAST INDEXED");
    println!("  {}", "-".repeat(76));
    for f in folders {
        let indexed = match f.last_indexed {
            Some(ts) => format_relative(ts, now),
            None => "never".to_string(),
        };
        println!("  {:<48} {:>6}   {}", f.path, f.document_count, indexed);
    }
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format `ts` relative to `now` (e.g. "3 hours ago").
pub fn format_relative(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - ts).num_seconds();

    if delta < 0 {
        return format_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_iso(ts)
    }
}

fn format_iso(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn bytes_scale_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn relative_times() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(format_relative(now - Duration::seconds(5), now), "just now");
        assert_eq!(format_relative(now - Duration::minutes(1), now), "1 min ago");
        assert_eq!(format_relative(now - Duration::hours(3), now), "3 hours ago");
        assert_eq!(format_relative(now - Duration::days(2), now), "2 days ago");
        assert_eq!(format_relative(now - Duration::days(90), now), "2024-03-03 12:00");
        assert_eq!(format_relative(now + Duration::hours(1), now), "2024-06-01 13:00");
    }
}
