//! Plain-text reports for `rsx load`, `rsx index` and `rsx status`.
//!
//! Rendering is kept separate from printing so the layout can be tested.

use resume_search_core::models::IngestionStats;
use resume_search_core::sync::IndexOutcome;

use crate::pipeline::Status;
use crate::progress::format_number;

fn n(v: usize) -> String {
    format_number(v as u64)
}

/// Ingestion summary for one load.
pub fn render_ingestion(stats: &IngestionStats) -> String {
    let mut out = String::new();
    out.push_str("load\n");
    out.push_str(&format!("  source:            {}\n", stats.source_path));
    if let Some(size) = std::fs::metadata(&stats.source_path).ok().map(|m| m.len()) {
        out.push_str(&format!("  size:              {}\n", format_bytes(size)));
    }
    out.push_str(&format!("  rows:              {}\n", n(stats.total_rows_raw)));
    out.push_str(&format!("  with text:         {}\n", n(stats.rows_with_any_text)));
    out.push_str(&format!("  without text:      {}\n", n(stats.rows_without_any_text)));
    out.push_str(&format!("  missing id:        {}\n", n(stats.rows_missing_id)));
    out.push_str(&format!("  blank after strip: {}\n", n(stats.rows_blank_after_strip)));
    out.push_str(&format!("  resume_str set:    {}\n", n(stats.str_non_empty)));
    out.push_str(&format!("  resume_html set:   {}\n", n(stats.html_non_empty)));
    if stats.rows_skipped_malformed > 0 {
        out.push_str(&format!(
            "  malformed lines:   {}\n",
            n(stats.rows_skipped_malformed)
        ));
    }
    out.push_str(&format!(
        "  used:              {} ({} excluded)\n",
        n(stats.rows_used),
        n(stats.rows_excluded)
    ));
    if let Some(err) = &stats.error {
        out.push_str(&format!("  error:             {}\n", err));
    }
    out
}

pub fn render_outcome(outcome: &IndexOutcome) -> String {
    match outcome {
        IndexOutcome::Fresh { count } => {
            format!("index\n  up to date: {} resumes\n", n(*count))
        }
        IndexOutcome::Rebuilt {
            count,
            reset,
            reembedded,
        } => format!(
            "index\n  indexed:    {} resumes\n  reset:      {}\n  re-embedded: {}\n",
            n(*count),
            if *reset { "yes" } else { "no" },
            if *reembedded { "yes" } else { "no" }
        ),
    }
}

pub fn render_status(status: &Status) -> String {
    let mut out = String::new();
    out.push_str("status\n");
    out.push_str(&format!(
        "  source:      {}{}\n",
        status.source.display(),
        if status.adopted { " (adopted)" } else { "" }
    ));
    out.push_str(&format!("  store:       {}\n", status.store_path.display()));
    out.push_str(&format!("  collection:  {}\n", status.collection));
    out.push_str(&format!("  entries:     {}\n", n(status.count)));
    match &status.state.indexed {
        Some(fp) => {
            out.push_str(&format!(
                "  indexed:     {} records, {} / {} [{}]\n",
                n(fp.record_count),
                fp.embedding_kind,
                fp.embedding_model,
                fp.digest()
            ));
            out.push_str(&format!(
                "  source mtime: {}\n",
                format_ts_relative(fp.modified_ms / 1000)
            ));
        }
        None => out.push_str("  indexed:     never\n"),
    }
    if status.state.pending_reindex {
        out.push_str("  pending:     reindex\n");
    }
    let fresh = match status.fresh {
        Some(true) => "fresh",
        Some(false) => "stale",
        None => "unknown",
    };
    out.push_str(&format!("  state:       {}\n", fresh));
    out
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

/// "3 hours ago" style rendering of a Unix timestamp.
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }
    let plural = |k: i64| if k == 1 { "" } else { "s" };
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        format!("{} min{} ago", delta / 60, plural(delta / 60))
    } else if delta < 86400 {
        format!("{} hour{} ago", delta / 3600, plural(delta / 3600))
    } else if delta < 86400 * 30 {
        format!("{} day{} ago", delta / 86400, plural(delta / 86400))
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
