// src/state/tracker.rs
//! Processed-entry tracker.
//!
//! FreshRSS entry ids are microsecond timestamps, so the leading 10 decimal
//! digits of an id are the Unix second it was fetched. Eviction relies on that
//! encoding: an id whose embedded second is older than the retention window is
//! dropped on every write.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{error, info, warn};

use super::{read_json, write_json};

#[derive(Debug, Clone)]
pub struct ProcessedTracker {
    path: PathBuf,
    retention: ChronoDuration,
}

impl ProcessedTracker {
    pub fn new(path: impl Into<PathBuf>, retention_hours: i64) -> Self {
        Self {
            path: path.into(),
            retention: ChronoDuration::hours(retention_hours.max(0)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current processed set. Read errors are logged and yield an empty set.
    pub fn load(&self) -> BTreeSet<i64> {
        match read_json::<Vec<i64>>(&self.path) {
            Ok(Some(ids)) => ids.into_iter().collect(),
            Ok(None) => BTreeSet::new(),
            Err(e) => {
                error!(path = %self.path.display(), error = %format!("{e:#}"), "failed to load processed ids");
                BTreeSet::new()
            }
        }
    }

    /// Merges `ids` into the stored set, prunes expired ids and rewrites the file.
    /// Returns the number of ids kept, or `None` when the existing file could
    /// not be read and was left untouched. Errors are logged, never raised.
    pub fn mark_processed(&self, ids: &[i64], now: DateTime<Utc>) -> Option<usize> {
        let mut all: BTreeSet<i64> = match read_json::<Vec<i64>>(&self.path) {
            Ok(existing) => existing.unwrap_or_default().into_iter().collect(),
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    error = %format!("{e:#}"),
                    "processed ids unreadable, not overwriting"
                );
                return None;
            }
        };
        all.extend(ids.iter().copied());
        let kept = prune_expired(all, now - self.retention);

        let as_list: Vec<i64> = kept.iter().copied().collect();
        match write_json(&self.path, &as_list) {
            Ok(()) => {
                info!(
                    path = %self.path.display(),
                    entries = as_list.len(),
                    "updated processed ids"
                );
                Some(as_list.len())
            }
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    error = %format!("{e:#}"),
                    "failed to update processed ids"
                );
                None
            }
        }
    }
}

/// Unix seconds embedded in the leading 10 digits of `id`.
/// Ids with fewer than 10 digits (or negative ids) carry no usable timestamp.
pub fn embedded_timestamp(id: i64) -> Option<i64> {
    if id < 0 {
        return None;
    }
    let digits = id.to_string();
    if digits.len() < 10 {
        return None;
    }
    digits[..10].parse().ok()
}

fn prune_expired(ids: BTreeSet<i64>, cutoff: DateTime<Utc>) -> BTreeSet<i64> {
    let cutoff_ts = cutoff.timestamp();
    let before = ids.len();
    let kept: BTreeSet<i64> = ids
        .into_iter()
        .filter(|id| embedded_timestamp(*id).is_some_and(|ts| ts >= cutoff_ts))
        .collect();
    let dropped = before - kept.len();
    if dropped > 0 {
        warn!(dropped, "pruned expired processed ids");
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn id_at(ts: i64, micros: i64) -> i64 {
        ts * 1_000_000 + micros
    }

    #[test]
    fn embedded_timestamp_reads_leading_digits() {
        assert_eq!(embedded_timestamp(1_760_000_000_123_456), Some(1_760_000_000));
        assert_eq!(embedded_timestamp(1_760_000_000), Some(1_760_000_000));
        assert_eq!(embedded_timestamp(12345), None);
        assert_eq!(embedded_timestamp(-1_760_000_000_000_000), None);
    }

    #[test]
    fn update_prunes_ids_older_than_window() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ProcessedTracker::new(dir.path().join("ids.json"), 48);
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();

        let stale = id_at((now - ChronoDuration::hours(49)).timestamp(), 1);
        let fresh = id_at((now - ChronoDuration::hours(47)).timestamp(), 2);
        tracker.mark_processed(&[stale, fresh], now - ChronoDuration::hours(2));
        assert!(tracker.load().contains(&stale));

        let new_id = id_at(now.timestamp(), 3);
        let kept = tracker.mark_processed(&[new_id], now);
        let set = tracker.load();
        assert_eq!(kept, Some(2));
        assert!(!set.contains(&stale));
        assert!(set.contains(&fresh));
        assert!(set.contains(&new_id));
    }

    #[test]
    fn unreadable_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.json");
        std::fs::write(&path, "{not json").unwrap();
        let tracker = ProcessedTracker::new(&path, 48);
        assert!(tracker.load().is_empty());

        let now = Utc::now();
        let id = id_at(now.timestamp(), 0);
        assert_eq!(tracker.mark_processed(&[id], now), None);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{not json");
    }

    #[test]
    fn missing_file_starts_a_fresh_set() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ProcessedTracker::new(dir.path().join("state/ids.json"), 48);
        let now = Utc::now();
        let id = id_at(now.timestamp(), 0);
        assert_eq!(tracker.mark_processed(&[id], now), Some(1));
        assert_eq!(tracker.load().into_iter().collect::<Vec<_>>(), vec![id]);
    }
}
