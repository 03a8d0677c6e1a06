//! Corpus statistics and health overview.
//!
//! Summarizes what is indexed: document counts by status, vector count, the
//! index files on disk, and the embedding and chunking settings in force.
//! Used by `lumina stats`.

use anyhow::Result;

use crate::corpus::Corpus;

/// Run the stats command: open the corpus and print a summary.
pub async fn run_stats(corpus: &Corpus) -> Result<()> {
    let stats = corpus.stats().await?;
    let config = corpus.config();

    let index_file = match stats.backend.as_str() {
        "sqlite" => config.sqlite_index_path(),
        _ => config.snapshot_path(),
    };
    let index_size = std::fs::metadata(&index_file).map(|m| m.len()).unwrap_or(0);

    println!("Lumina: Corpus Stats");
    println!("====================");
    println!();
    println!("  Data dir:    {}", config.data.dir.display());
    println!("  Index:       {} ({})", stats.backend, index_file.display());
    println!("  Size:        {}", format_bytes(index_size));
    println!();
    println!("  Documents:   {}", stats.documents);
    println!("    indexed:   {}", stats.indexed);
    println!("    failed:    {}", stats.failed);
    if stats.in_progress > 0 {
        println!("    pending:   {}", stats.in_progress);
    }
    println!("  Vectors:     {}", stats.vectors);
    println!();
    println!("  Model:       {} ({} dims)", stats.embedding_model, stats.dims);
    println!(
        "  Chunking:    {} tokens, {} overlap",
        stats.chunk_size, stats.overlap_tokens
    );

    let docs = corpus.documents().await;
    if let Some(latest) = docs.iter().map(|d| d.updated_at.timestamp()).max() {
        println!("  Last change: {}", format_ts_relative(latest));
    }
    println!();

    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
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

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
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

pub(crate) fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn relative_times() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(0), "1970-01-01 00:00");
    }
}
