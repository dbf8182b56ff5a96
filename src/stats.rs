//! Library statistics overview.
//!
//! Used by `gv stats` to show what is catalogued and what the job tables
//! hold.

use crate::error::Result;
use crate::vault::Vault;

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(vault: &Vault) -> Result<()> {
    let stats = vault.stats().await?;
    let config = vault.config();

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Game Vault — Library Stats");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Games:       {}", stats.games);
    println!("  On disk:     {}", format_bytes(stats.total_size_bytes));
    println!("  Groups:      {}", vault.catalog().len());

    print_counts("Unmatched folders", &stats.unmatched);
    print_counts("Scan jobs", &stats.scan_jobs);
    print_counts("Download requests", &stats.downloads);

    let last_scan = vault
        .scans()
        .list()
        .await?
        .into_iter()
        .find_map(|job| job.ended_at);
    println!();
    println!(
        "  Last scan:   {}",
        last_scan
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();
    Ok(())
}

fn print_counts<S: std::fmt::Display>(title: &str, counts: &[(S, u64)]) {
    println!();
    println!("  {}:", title);
    for (status, count) in counts {
        println!("    {:<12} {:>6}", status.to_string(), count);
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

/// Format a Unix timestamp relative to now (e.g. "3 hours ago").
pub fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
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
        format_ts_iso(ts)
    }
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_pick_a_unit() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn old_timestamps_fall_back_to_dates() {
        assert_eq!(format_ts_relative(0), "1970-01-01 00:00");
        let recent = chrono::Utc::now().timestamp() - 7200;
        assert_eq!(format_ts_relative(recent), "2 hours ago");
    }
}
