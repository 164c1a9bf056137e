//! # Stage 1: per-article summarization
//! Fans out one completion request per item over a bounded worker pool, retries
//! each item a few times with jittered exponential backoff, and reassembles the
//! results in source order no matter which task finishes first.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use rand::Rng;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::ai::{GenerationRequest, SharedFactory};
use crate::config::DigestConfig;
use crate::ingest::Item;

#[derive(Debug, Clone)]
pub struct Stage1Settings {
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_workers: usize,
    pub max_attempts: u32,
    /// Deadline for one completion call; a timeout counts as a failed attempt.
    pub call_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_jitter: Duration,
}

impl Stage1Settings {
    pub fn from_config(cfg: &DigestConfig) -> Self {
        Self {
            model: cfg.stage1_model().to_string(),
            system_prompt: cfg.ai.stage1_prompt.clone(),
            temperature: cfg.ai.stage1_temperature,
            max_workers: cfg.pipeline.stage1_max_workers.max(1),
            max_attempts: cfg.pipeline.stage1_max_attempts.max(1),
            call_timeout: Duration::from_secs(cfg.ai.request_timeout_secs),
            backoff_base: Duration::from_millis(300),
            backoff_jitter: Duration::from_millis(200),
        }
    }
}

/// Result of one summarization task. `index` is 1-based source position;
/// an empty `summary` means every attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleSummary {
    pub index: usize,
    pub title: String,
    pub source: String,
    pub link: String,
    pub summary: String,
}

impl ArticleSummary {
    fn failed(index: usize, item: &Item) -> Self {
        Self {
            index,
            title: item.title.clone(),
            source: item.source_name.clone(),
            link: item.link.clone(),
            summary: String::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.summary.trim().is_empty()
    }

    /// Self-delimited block handed to stage 2.
    pub fn render_block(&self) -> String {
        format!(
            "--- ARTICLE {i} START ---\n[Source: {s}] [Link: {l}] [Title: {t}]\nKey points:\n{b}\n--- ARTICLE {i} END ---",
            i = self.index,
            s = self.source,
            l = self.link,
            t = self.title,
            b = self.summary,
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergedBatch {
    /// Per-article blocks in source order.
    pub text: String,
    pub total: usize,
    pub failed: usize,
}

impl MergedBatch {
    /// True when no article produced a usable summary.
    pub fn is_empty(&self) -> bool {
        self.total == 0 || self.failed == self.total
    }
}

pub fn article_prompt(item: &Item) -> String {
    format!(
        "Extract the key points of the following article, following the format in the system instructions:\n\n\
         Title: {}\nSource: {}\nLink: {}\nBody:\n{}\n",
        item.title, item.source_name, item.link, item.body
    )
}

/// Summarize `items` concurrently and merge the blocks in input order.
pub async fn summarize_items(
    factory: SharedFactory,
    items: &[Item],
    settings: &Stage1Settings,
) -> MergedBatch {
    if items.is_empty() {
        return MergedBatch::default();
    }

    debug!(
        target: "api",
        entries = items.len(),
        max_workers = settings.max_workers,
        "stage1 parallel summarization start"
    );

    let permits = Arc::new(Semaphore::new(settings.max_workers.max(1)));
    let settings = Arc::new(settings.clone());
    let mut tasks = JoinSet::new();

    for (pos, item) in items.iter().enumerate() {
        let permits = Arc::clone(&permits);
        let factory = Arc::clone(&factory);
        let settings = Arc::clone(&settings);
        let item = item.clone();
        tasks.spawn(async move {
            // Closed only if the semaphore is dropped, which cannot happen while tasks hold it.
            let _permit = permits.acquire_owned().await.ok();
            summarize_one(factory, pos + 1, &item, &settings).await
        });
    }

    // Index-addressed slots: completion order is irrelevant.
    let mut slots: Vec<Option<ArticleSummary>> = vec![None; items.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(res) => {
                let slot = res.index - 1;
                slots[slot] = Some(res);
            }
            Err(e) => error!(target: "api", error = %e, "stage1 task aborted"),
        }
    }

    let mut failed = 0usize;
    let blocks: Vec<String> = slots
        .into_iter()
        .enumerate()
        .map(|(pos, slot)| {
            let res = slot.unwrap_or_else(|| ArticleSummary::failed(pos + 1, &items[pos]));
            if res.is_failed() {
                failed += 1;
            }
            res.render_block()
        })
        .collect();

    let merged = MergedBatch {
        text: blocks.join("\n\n"),
        total: items.len(),
        failed,
    };
    debug!(
        target: "api",
        entries = merged.total,
        failed = merged.failed,
        len = merged.text.len(),
        "stage1 merged summaries generated"
    );
    merged
}

/// One article with retry. Never fails: exhausting attempts yields an empty summary.
async fn summarize_one(
    factory: SharedFactory,
    index: usize,
    item: &Item,
    settings: &Stage1Settings,
) -> ArticleSummary {
    let short_title: String = item.title.chars().take(60).collect();
    let req = GenerationRequest {
        model: settings.model.clone(),
        system: settings.system_prompt.clone(),
        user: article_prompt(item),
        temperature: settings.temperature,
    };

    for attempt in 1..=settings.max_attempts {
        match attempt_once(&factory, &req, settings.call_timeout).await {
            Ok(summary) => {
                if attempt > 1 {
                    debug!(target: "api", attempt, title = %short_title, "stage1 success on retry");
                }
                return ArticleSummary {
                    summary,
                    ..ArticleSummary::failed(index, item)
                };
            }
            Err(reason) => {
                warn!(
                    target: "api",
                    attempt,
                    max_attempts = settings.max_attempts,
                    title = %short_title,
                    %reason,
                    "stage1 attempt failed"
                );
                if attempt < settings.max_attempts {
                    tokio::time::sleep(backoff_delay(settings, attempt)).await;
                }
            }
        }
    }

    error!(
        target: "api",
        title = %short_title,
        attempts = settings.max_attempts,
        "stage1 giving up"
    );
    counter!("digest_stage1_item_failures_total").increment(1);
    ArticleSummary::failed(index, item)
}

async fn attempt_once(
    factory: &SharedFactory,
    req: &GenerationRequest,
    deadline: Duration,
) -> Result<String, String> {
    // Fresh handle per attempt: nothing is shared with sibling tasks.
    let client = factory.client().map_err(|e| format!("{e:#}"))?;
    match tokio::time::timeout(deadline, client.generate(req)).await {
        Err(_) => Err(format!("timed out after {}s", deadline.as_secs_f32())),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Ok(Ok(text)) if text.trim().is_empty() => Err("empty summary".to_string()),
        Ok(Ok(text)) => Ok(text.trim().to_string()),
    }
}

/// base * 2^(attempt-1) plus uniform jitter in [0, jitter].
fn backoff_delay(settings: &Stage1Settings, attempt: u32) -> Duration {
    let exp = settings
        .backoff_base
        .saturating_mul(1u32 << (attempt - 1).min(16));
    let jitter_ms = settings.backoff_jitter.as_millis() as u64;
    let jitter = if jitter_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..=jitter_ms)
    };
    exp + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Stage1Settings {
        Stage1Settings {
            model: "m".into(),
            system_prompt: "s".into(),
            temperature: 0.1,
            max_workers: 2,
            max_attempts: 2,
            call_timeout: Duration::from_secs(5),
            backoff_base: Duration::from_millis(300),
            backoff_jitter: Duration::from_millis(200),
        }
    }

    #[test]
    fn backoff_doubles_and_stays_within_jitter() {
        let s = settings();
        for _ in 0..20 {
            let d1 = backoff_delay(&s, 1);
            assert!(d1 >= Duration::from_millis(300) && d1 <= Duration::from_millis(500));
            let d2 = backoff_delay(&s, 2);
            assert!(d2 >= Duration::from_millis(600) && d2 <= Duration::from_millis(800));
        }
    }

    #[test]
    fn block_carries_header_and_markers() {
        let s = ArticleSummary {
            index: 3,
            title: "T".into(),
            source: "S".into(),
            link: "https://x".into(),
            summary: "- **A** did B".into(),
        };
        let b = s.render_block();
        assert!(b.starts_with("--- ARTICLE 3 START ---\n[Source: S] [Link: https://x] [Title: T]"));
        assert!(b.contains("- **A** did B"));
        assert!(b.ends_with("--- ARTICLE 3 END ---"));
    }

    #[test]
    fn empty_batch_detection() {
        assert!(MergedBatch::default().is_empty());
        let all_failed = MergedBatch {
            text: "x".into(),
            total: 2,
            failed: 2,
        };
        assert!(all_failed.is_empty());
        let partial = MergedBatch {
            text: "x".into(),
            total: 2,
            failed: 1,
        };
        assert!(!partial.is_empty());
    }
}
