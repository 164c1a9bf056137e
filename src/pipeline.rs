//! # Digest pipeline
//! `FETCH → FILTER → SUMMARIZE → AGGREGATE → VALIDATE → COMMIT → DELIVER`.
//!
//! Two independent commit points: processed ids are written as soon as a valid
//! digest exists (before delivery), history only after a confirmed send.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use tracing::{error, info, warn};

use crate::aggregate::{self, DigestFailure, Stage2Settings};
use crate::ai::SharedFactory;
use crate::config::DigestConfig;
use crate::ingest::{Item, ItemSource};
use crate::notify::{self, ChatTransport, DeliveryError, DeliveryReport, MarkupMode};
use crate::state::{DigestHistory, ProcessedTracker};
use crate::summarize::{self, Stage1Settings};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("digest_runs_total", "Pipeline runs by terminal status.");
        describe_counter!(
            "digest_generate_attempts_total",
            "Summarize+aggregate attempts."
        );
        describe_counter!(
            "digest_stage1_item_failures_total",
            "Articles whose summary failed on every attempt."
        );
        describe_counter!("digest_delivery_chunks_total", "Chunks accepted by the chat API.");
        describe_counter!("digest_delivery_failures_total", "Chunks rejected or not delivered.");
        describe_gauge!(
            "digest_last_success_ts",
            "Unix ts of the last run that produced a valid digest."
        );
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Filter,
    Summarize,
    Aggregate,
    Validate,
    Commit,
    Deliver,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Fetch => "FETCH",
            Stage::Filter => "FILTER",
            Stage::Summarize => "SUMMARIZE",
            Stage::Aggregate => "AGGREGATE",
            Stage::Validate => "VALIDATE",
            Stage::Commit => "COMMIT",
            Stage::Deliver => "DELIVER",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    NoNewItems,
    Failed,
}

impl RunStatus {
    fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::NoNewItems => "no_new_items",
            RunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    /// The digest on success, otherwise the explanatory message.
    pub text: String,
    pub items: usize,
    /// `None` when delivery was disabled or not attempted.
    pub delivery: Option<Result<DeliveryReport, DeliveryError>>,
}

impl RunReport {
    fn finish(status: RunStatus, text: String, items: usize) -> Self {
        counter!("digest_runs_total", "status" => status.as_str()).increment(1);
        Self {
            status,
            text,
            items,
            delivery: None,
        }
    }
}

pub struct DigestPipeline<'a> {
    cfg: &'a DigestConfig,
    source: Arc<dyn ItemSource>,
    factory: SharedFactory,
    transport: Option<Arc<dyn ChatTransport>>,
    tracker: ProcessedTracker,
    history: DigestHistory,
}

impl<'a> DigestPipeline<'a> {
    pub fn new(
        cfg: &'a DigestConfig,
        source: Arc<dyn ItemSource>,
        factory: SharedFactory,
        transport: Option<Arc<dyn ChatTransport>>,
    ) -> Self {
        Self {
            tracker: ProcessedTracker::new(
                cfg.processed_ids_path(),
                cfg.pipeline.processed_retention_hours,
            ),
            history: DigestHistory::new(cfg.history_path(), cfg.pipeline.history_limit),
            cfg,
            source,
            factory,
            transport,
        }
    }

    pub fn tracker(&self) -> &ProcessedTracker {
        &self.tracker
    }

    pub fn history(&self) -> &DigestHistory {
        &self.history
    }

    /// Run once. `send` enables delivery of the digest (or failure notice).
    pub async fn run(&self, hours_back: u32, send: bool) -> RunReport {
        ensure_metrics_described();
        info!(
            hours_back,
            processed_ids = %self.tracker.path().display(),
            source = self.source.name(),
            "starting digest run"
        );

        // FETCH
        let processed = self.tracker.load();
        let since = Duration::from_secs(u64::from(hours_back) * 3600);
        let fetched = match self.source.fetch_recent(since, &processed).await {
            Ok(v) => v,
            Err(e) => {
                let msg = format!("Failed to fetch entries: {e:#}");
                error!(stage = %Stage::Fetch, "{msg}");
                self.notify_failure(&msg, send).await;
                return RunReport::finish(RunStatus::Failed, msg, 0);
            }
        };

        // FILTER
        let items = drop_processed(fetched, &processed);
        if items.is_empty() {
            let msg = format!(
                "No new entries found in the past {hours_back} hours (after filtering processed IDs)."
            );
            warn!(stage = %Stage::Filter, "{msg}");
            return RunReport::finish(RunStatus::NoNewItems, msg, 0);
        }
        info!(stage = %Stage::Filter, entries = items.len(), "new entries found");

        // SUMMARIZE → AGGREGATE → VALIDATE, retried as a unit
        let max_attempts = self.cfg.pipeline.generate_max_attempts.max(1);
        let mut last_failure = None;
        let mut digest = None;
        for attempt in 1..=max_attempts {
            info!(attempt, max_attempts, "generating digest");
            counter!("digest_generate_attempts_total").increment(1);
            match self.generate_once(&items).await {
                Ok(d) => {
                    digest = Some(d);
                    break;
                }
                Err(f) => {
                    error!(attempt, failure = %f, "digest generation attempt failed");
                    last_failure = Some(f);
                    if attempt < max_attempts {
                        info!("retrying digest generation");
                    }
                }
            }
        }

        let Some(digest) = digest else {
            let reason = last_failure
                .map(|f| f.to_string())
                .unwrap_or_else(|| "empty digest".to_string());
            let msg = format!(
                "Digest generation failed after {max_attempts} attempts. Error: {reason}"
            );
            error!("{msg}; processed ids left untouched");
            self.notify_failure(&msg, send).await;
            return RunReport::finish(RunStatus::Failed, msg, items.len());
        };

        // COMMIT before delivery: a failed send must not cause reprocessing.
        let ids: Vec<i64> = items.iter().map(|i| i.id).collect();
        match self.tracker.mark_processed(&ids, Utc::now()) {
            Some(kept) => info!(stage = %Stage::Commit, committed = ids.len(), tracked = kept, "entries marked processed"),
            None => warn!(stage = %Stage::Commit, committed = ids.len(), "processed ids not saved; entries may be picked up again"),
        }

        let mut report = RunReport::finish(RunStatus::Success, digest, items.len());

        // DELIVER
        if send {
            match &self.transport {
                Some(t) => {
                    let res = notify::deliver(t.as_ref(), &report.text, MarkupMode::Structured).await;
                    match &res {
                        Ok(r) => {
                            info!(stage = %Stage::Deliver, chunks = r.chunks_sent, "digest sent");
                            self.history.record(&report.text);
                        }
                        Err(e) => {
                            error!(stage = %Stage::Deliver, error = %e, "failed to send digest; history not updated");
                        }
                    }
                    report.delivery = Some(res);
                }
                None => warn!(stage = %Stage::Deliver, "delivery requested but no transport configured"),
            }
        }
        gauge!("digest_last_success_ts").set(Utc::now().timestamp() as f64);
        report
    }

    /// One full generate attempt: stage 1 from scratch, stage 2, validity gate.
    async fn generate_once(&self, items: &[Item]) -> Result<String, DigestFailure> {
        info!(stage = %Stage::Summarize, entries = items.len(), "summarizing each article");
        let batch = summarize::summarize_items(
            Arc::clone(&self.factory),
            items,
            &Stage1Settings::from_config(self.cfg),
        )
        .await;
        if batch.is_empty() {
            return Err(DigestFailure::EmptySummaries);
        }
        if batch.failed > 0 {
            warn!(failed = batch.failed, total = batch.total, "some articles have no summary");
        }

        let history = self.history.load();
        info!(stage = %Stage::Aggregate, history = history.len(), "finalizing digest");
        let client = self
            .factory
            .client()
            .map_err(|e| DigestFailure::AggregateError(format!("{e:#}")))?;
        let body = aggregate::aggregate(
            client.as_ref(),
            &batch.text,
            &history,
            &Stage2Settings::from_config(self.cfg),
        )
        .await?;

        let digest = aggregate::with_title(&self.cfg.digest_title, &body, &Local::now());
        aggregate::check_digest(&digest, &self.cfg.pipeline.failure_markers)?;
        info!(stage = %Stage::Validate, len = digest.chars().count(), "digest generated");
        Ok(digest)
    }

    /// Best-effort failure notice through the normal delivery path.
    async fn notify_failure(&self, msg: &str, send: bool) {
        if !send {
            return;
        }
        let Some(t) = &self.transport else {
            return;
        };
        if let Err(e) = notify::deliver(t.as_ref(), msg, MarkupMode::Structured).await {
            warn!(error = %e, "failure notice could not be sent");
        }
    }
}

/// Enforces the "processed ids are never new" invariant even if a source
/// ignores its exclude set.
fn drop_processed(items: Vec<Item>, processed: &BTreeSet<i64>) -> Vec<Item> {
    let mut seen = BTreeSet::new();
    items
        .into_iter()
        .filter(|i| !processed.contains(&i.id) && seen.insert(i.id))
        .collect()
}
