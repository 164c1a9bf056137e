// src/state/history.rs
//! Bounded log of recently sent digests, newest first. Fed back into stage 2
//! so the model can skip points it already published.

use std::path::{Path, PathBuf};

use tracing::{error, info};

use super::{read_json, write_json};

#[derive(Debug, Clone)]
pub struct DigestHistory {
    path: PathBuf,
    cap: usize,
}

impl DigestHistory {
    pub fn new(path: impl Into<PathBuf>, cap: usize) -> Self {
        Self {
            path: path.into(),
            cap: cap.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored digests, newest first. Never fails: errors are logged and an empty
    /// list is returned.
    pub fn load(&self) -> Vec<String> {
        match read_json::<Vec<String>>(&self.path) {
            Ok(Some(mut v)) => {
                v.truncate(self.cap);
                v
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                error!(path = %self.path.display(), error = %format!("{e:#}"), "failed to load digest history");
                Vec::new()
            }
        }
    }

    /// Prepends `digest` and evicts the oldest entries beyond the cap.
    /// Returns the stored entry count, or `None` when nothing was written
    /// (an unreadable existing file is left as it is).
    pub fn record(&self, digest: &str) -> Option<usize> {
        let mut v = match read_json::<Vec<String>>(&self.path) {
            Ok(existing) => existing.unwrap_or_default(),
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    error = %format!("{e:#}"),
                    "digest history unreadable, not overwriting"
                );
                return None;
            }
        };
        v.insert(0, digest.to_string());
        v.truncate(self.cap);

        match write_json(&self.path, &v) {
            Ok(()) => {
                info!(entries = v.len(), "saved digest to history");
                Some(v.len())
            }
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    error = %format!("{e:#}"),
                    "failed to save digest to history"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eleventh_entry_evicts_the_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let h = DigestHistory::new(dir.path().join("history.json"), 10);
        for i in 1..=11 {
            h.record(&format!("digest {i}"));
        }
        let v = h.load();
        assert_eq!(v.len(), 10);
        assert_eq!(v[0], "digest 11");
        assert_eq!(v[9], "digest 2");
        assert!(!v.iter().any(|d| d == "digest 1"));
    }

    #[test]
    fn missing_and_malformed_files_read_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let h = DigestHistory::new(&path, 10);
        assert!(h.load().is_empty());

        std::fs::write(&path, r#"{"not": "a list"}"#).unwrap();
        assert!(h.load().is_empty());
    }

    #[test]
    fn unreadable_history_is_kept_on_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "[\"old digest\"").unwrap();
        let h = DigestHistory::new(&path, 10);

        assert_eq!(h.record("new digest"), None);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[\"old digest\"");
    }
}
