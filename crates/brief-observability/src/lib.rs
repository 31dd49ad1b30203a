//! Logging for the pipeline processes.
//!
//! One call at startup wires a compact console layer and a daily-rotated
//! JSONL file layer, prunes rotated files past the retention window, and
//! hands back the writer guard. Prompt and report text must never land
//! in the logs in clear text; [`log_payload_event`] is the sanctioned
//! way to record that such a payload existed.

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
pub use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Serialize)]
pub struct LoggingInitInfo {
    pub process: String,
    pub logs_dir: String,
    pub prefix: String,
    pub retention_days: u64,
    pub files_pruned: usize,
    pub initialized_at: chrono::DateTime<Utc>,
}

/// Reduce content to length plus hash so log lines can prove a payload
/// existed without storing contact data or report text.
pub fn redact_text(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!(
        "[redacted len={} hash={}]",
        trimmed.len(),
        short_hash(trimmed)
    )
}

pub fn short_hash(input: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Record that a component produced or consumed a sensitive payload.
/// Only the redacted form reaches the subscriber.
pub fn log_payload_event(component: &str, event: &str, payload: &str) {
    tracing::debug!(
        target: "brief.obs",
        component,
        event,
        payload = %redact_text(payload),
        "payload_event"
    );
}

/// Initialize process logging: console plus a rotated JSONL file per day
/// (`brief.<process>.jsonl.YYYY-MM-DD`). Rotated files past the
/// retention window are pruned before the writer opens. Dropping the
/// returned guard flushes the file layer.
pub fn init_process_logging(
    process: &str,
    logs_dir: &Path,
    retention_days: u64,
) -> anyhow::Result<(WorkerGuard, LoggingInitInfo)> {
    fs::create_dir_all(logs_dir)?;

    let prefix = format!("brief.{process}.jsonl");
    let files_pruned = prune_expired_logs(logs_dir, &prefix, retention_days);

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, &prefix));

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_target(true)
                .with_ansi(true),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(writer),
        )
        .try_init()
        .ok();

    let info = LoggingInitInfo {
        process: process.to_string(),
        logs_dir: logs_dir.display().to_string(),
        prefix,
        retention_days,
        files_pruned,
        initialized_at: Utc::now(),
    };

    Ok((guard, info))
}

/// Delete rotated log files whose date suffix fell out of the retention
/// window. Files without a parsable suffix stay untouched. Returns how
/// many files were removed.
pub fn prune_expired_logs(logs_dir: &Path, prefix: &str, retention_days: u64) -> usize {
    let Some(cutoff) = Utc::now()
        .date_naive()
        .checked_sub_days(chrono::Days::new(retention_days))
    else {
        return 0;
    };
    let Ok(entries) = fs::read_dir(logs_dir) else {
        return 0;
    };

    let expired: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| rotation_date(name, prefix))
                .map(|date| date < cutoff)
                .unwrap_or(false)
        })
        .collect();

    let mut removed = 0;
    for path in expired {
        if fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    removed
}

/// Date suffix the rolling appender puts after the prefix.
fn rotation_date(file_name: &str, prefix: &str) -> Option<NaiveDate> {
    let suffix = file_name.strip_prefix(prefix)?.strip_prefix('.')?;
    NaiveDate::parse_from_str(suffix, "%Y-%m-%d").ok()
}

pub fn canonical_logs_dir_from_root(root: &Path) -> PathBuf {
    root.join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_text_masks_content() {
        let raw = "Jane Doe — Director — jane@district.k12.us";
        let redacted = redact_text(raw);
        assert!(redacted.contains("[redacted len="));
        assert!(!redacted.contains("jane@district.k12.us"));
    }

    #[test]
    fn rotation_date_parses_only_well_formed_suffixes() {
        let prefix = "brief.engine.jsonl";
        assert_eq!(
            rotation_date("brief.engine.jsonl.2026-08-01", prefix),
            NaiveDate::from_ymd_opt(2026, 8, 1)
        );
        assert_eq!(rotation_date("brief.engine.jsonl", prefix), None);
        assert_eq!(rotation_date("brief.engine.jsonl.today", prefix), None);
        assert_eq!(rotation_date("other.log.2026-08-01", prefix), None);
    }

    #[test]
    fn prune_counts_expired_files_and_keeps_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = "brief.engine.jsonl";
        let expired = dir.path().join("brief.engine.jsonl.2000-01-01");
        let fresh = dir.path().join("brief.engine.jsonl.2999-01-01");
        let unrelated = dir.path().join("notes.txt");
        fs::write(&expired, "{}").unwrap();
        fs::write(&fresh, "{}").unwrap();
        fs::write(&unrelated, "keep").unwrap();

        let removed = prune_expired_logs(dir.path(), prefix, 30);

        assert_eq!(removed, 1);
        assert!(!expired.exists());
        assert!(fresh.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn canonical_logs_dir_joins_logs_folder() {
        let root = PathBuf::from("/tmp/brief");
        assert_eq!(
            canonical_logs_dir_from_root(&root),
            PathBuf::from("/tmp/brief").join("logs")
        );
    }
}
