// src/ingest/types.rs
use anyhow::Result;
use std::collections::BTreeSet;
use std::time::Duration;

/// One feed entry as handed to the summarizer. The id doubles as a timestamp
/// (see `state::tracker::embedded_timestamp`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: i64,
    pub title: String,
    pub source_name: String,
    pub link: String,
    pub body: String, // normalized plain text
}

#[async_trait::async_trait]
pub trait ItemSource: Send + Sync {
    /// Entries newer than `since`, skipping any id in `exclude`.
    async fn fetch_recent(&self, since: Duration, exclude: &BTreeSet<i64>) -> Result<Vec<Item>>;
    fn name(&self) -> &'static str;
}
