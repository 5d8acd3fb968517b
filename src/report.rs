//! Run summary output.
//!
//! `embedpipe run` prints [`ProcessingStats`] to stdout either as a small
//! table or, with `--json`, as pretty-printed JSON.

use anyhow::Result;
use embedding_pipeline_core::stats::ProcessingStats;

pub fn print_stats(stats: &ProcessingStats, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(stats)?);
    } else {
        print!("{}", render_stats(stats));
    }
    Ok(())
}

pub fn render_stats(stats: &ProcessingStats) -> String {
    let mut out = String::new();
    out.push_str("Embedding Pipeline: Run Summary\n");
    out.push_str("===============================\n\n");
    out.push_str(&format!(
        "  Date range:    {} .. {}\n",
        stats.date_range.start, stats.date_range.end
    ));
    out.push_str(&format!(
        "  Services:      {}\n",
        if stats.services_processed.is_empty() {
            "(none)".to_string()
        } else {
            stats.services_processed.join(", ")
        }
    ));
    out.push_str(&format!(
        "  Objects:       {} processed, {} skipped\n",
        format_number(stats.objects_processed as u64),
        format_number(stats.objects_skipped as u64)
    ));
    out.push('\n');
    out.push_str(&format!(
        "  Embeddings:    {}\n",
        format_number(stats.total_embeddings as u64)
    ));
    out.push_str(&format!(
        "  Avg chunk:     {:.1} tokens\n",
        stats.average_chunk_size
    ));
    if stats.chunks_dropped > 0 {
        out.push_str(&format!(
            "  Dropped:       {} chunks\n",
            format_number(stats.chunks_dropped as u64)
        ));
    }
    out.push_str(&format!(
        "  Vectors:       {}\n",
        format_number(stats.vectors_stored as u64)
    ));
    match stats.backup_key {
        Some(ref key) => out.push_str(&format!(
            "  Backup:        {} ({})\n",
            key,
            format_bytes(stats.backup_file_size)
        )),
        None => out.push_str("  Backup:        (none)\n"),
    }
    out.push_str(&format!(
        "  Elapsed:       {}\n",
        format_duration_ms(stats.processing_time_ms)
    ));
    out
}

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

/// Thousands separators: `1234567` → `"1,234,567"`.
fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn format_duration_ms(ms: u64) -> String {
    if ms < 1000 {
        format!("{} ms", ms)
    } else if ms < 60_000 {
        format!("{:.1} s", ms as f64 / 1000.0)
    } else {
        format!("{}m {}s", ms / 60_000, (ms % 60_000) / 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedding_pipeline_core::stats::StatsDateRange;

    fn stats() -> ProcessingStats {
        ProcessingStats {
            total_texts_processed: 1500,
            total_chunks: 1500,
            total_embeddings: 1500,
            average_chunk_size: 212.5,
            processing_time_ms: 83_000,
            services_processed: vec!["journal-service".to_string(), "chat-service".to_string()],
            vectors_stored: 1500,
            backup_file_size: 2048,
            backup_key: Some("embeddings/embeddings_backup_x.json.gz".to_string()),
            objects_processed: 12,
            objects_skipped: 1,
            chunks_dropped: 0,
            date_range: StatsDateRange {
                start: "2024-01-01T00:00:00.000Z".to_string(),
                end: "2024-01-03T23:59:59.999Z".to_string(),
            },
        }
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration_ms(250), "250 ms");
        assert_eq!(format_duration_ms(1500), "1.5 s");
        assert_eq!(format_duration_ms(83_000), "1m 23s");
    }

    #[test]
    fn test_render_stats() {
        let text = render_stats(&stats());
        assert!(text.contains("journal-service, chat-service"));
        assert!(text.contains("Embeddings:    1,500"));
        assert!(text.contains("(2.0 KB)"));
        assert!(text.contains("12 processed, 1 skipped"));
        assert!(!text.contains("Dropped"));
    }
}
