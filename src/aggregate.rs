//! # Stage 2: digest aggregation
//! One completion request merges all per-article notes into the final digest,
//! with recently sent digests supplied as context so repeated points can be
//! dropped. Reads history, never writes it.

use std::time::Duration;

use chrono::{DateTime, TimeZone};
use thiserror::Error;
use tracing::{debug, error};

use crate::ai::{GenerationRequest, TextGenerator};
use crate::config::DigestConfig;

/// Why a generate attempt produced no usable digest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DigestFailure {
    #[error("stage1 produced no summaries")]
    EmptySummaries,
    #[error("stage2 returned empty content")]
    EmptyAggregate,
    #[error("stage2 request failed: {0}")]
    AggregateError(String),
    #[error("digest contains failure marker {0:?}")]
    FailureMarker(String),
}

#[derive(Debug, Clone)]
pub struct Stage2Settings {
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub call_timeout: Duration,
}

impl Stage2Settings {
    pub fn from_config(cfg: &DigestConfig) -> Self {
        Self {
            model: cfg.ai.stage2_model.clone(),
            system_prompt: cfg.ai.stage2_prompt.clone(),
            temperature: cfg.ai.stage2_temperature,
            call_timeout: Duration::from_secs(cfg.ai.request_timeout_secs),
        }
    }
}

/// User message for stage 2: optional history block, then the current batch.
/// Neither section is truncated.
pub fn build_user_prompt(merged: &str, history: &[String]) -> String {
    let mut parts = Vec::with_capacity(2);
    if !history.is_empty() {
        parts.push(format!(
            "Recently sent digests (for deduplication only):\n\
             --- HISTORY_START ---\n{}\n--- HISTORY_END ---\n",
            history.join("\n\n---\n\n")
        ));
    }
    parts.push(format!(
        "Article notes for this run:\n\
         --- ABSTRACT_BATCH_START ---\n\n{merged}\n\n--- ABSTRACT_BATCH_END ---"
    ));
    parts.join("\n")
}

/// Single aggregation call. Returns the digest body trimmed.
pub async fn aggregate(
    client: &dyn TextGenerator,
    merged: &str,
    history: &[String],
    settings: &Stage2Settings,
) -> Result<String, DigestFailure> {
    if merged.trim().is_empty() {
        return Err(DigestFailure::EmptySummaries);
    }

    let req = GenerationRequest {
        model: settings.model.clone(),
        system: settings.system_prompt.clone(),
        user: build_user_prompt(merged, history),
        temperature: settings.temperature,
    };

    let out = match tokio::time::timeout(settings.call_timeout, client.generate(&req)).await {
        Err(_) => Err(format!(
            "timed out after {}s",
            settings.call_timeout.as_secs_f32()
        )),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Ok(Ok(text)) => Ok(text),
    };

    match out {
        Ok(text) => {
            let digest = text.trim().to_string();
            debug!(target: "api", len = digest.len(), history = history.len(), "stage2 digest generated");
            if digest.is_empty() {
                Err(DigestFailure::EmptyAggregate)
            } else {
                Ok(digest)
            }
        }
        Err(reason) => {
            error!(target: "api", %reason, "stage2 digest generation error");
            Err(DigestFailure::AggregateError(reason))
        }
    }
}

/// Validity gate: a digest must be non-blank and free of failure markers.
pub fn check_digest(digest: &str, markers: &[String]) -> Result<(), DigestFailure> {
    if digest.trim().is_empty() {
        return Err(DigestFailure::EmptyAggregate);
    }
    if let Some(m) = markers.iter().find(|m| digest.contains(m.as_str())) {
        return Err(DigestFailure::FailureMarker(m.clone()));
    }
    Ok(())
}

/// Prefix the body with a `# {title} - YYYY/MM/DD HH:MM` header.
pub fn with_title<Tz: TimeZone>(title: &str, body: &str, now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("# {title} - {}\n\n{body}", now.format("%Y/%m/%d %H:%M"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn prompt_without_history_has_only_batch() {
        let p = build_user_prompt("BATCH", &[]);
        assert!(!p.contains("HISTORY_START"));
        assert!(p.contains("--- ABSTRACT_BATCH_START ---\n\nBATCH\n\n--- ABSTRACT_BATCH_END ---"));
    }

    #[test]
    fn prompt_with_history_comes_first() {
        let hist = vec!["newest".to_string(), "older".to_string()];
        let p = build_user_prompt("BATCH", &hist);
        let h = p.find("HISTORY_START").unwrap();
        let b = p.find("ABSTRACT_BATCH_START").unwrap();
        assert!(h < b);
        assert!(p.contains("newest\n\n---\n\nolder"));
    }

    #[test]
    fn markers_and_blank_fail_the_gate() {
        let markers = vec!["Failed to generate digest".to_string()];
        assert_eq!(check_digest("  ", &markers), Err(DigestFailure::EmptyAggregate));
        assert!(matches!(
            check_digest("Failed to generate digest: x", &markers),
            Err(DigestFailure::FailureMarker(_))
        ));
        assert!(check_digest("## AI\n- **Acme** ships", &markers).is_ok());
    }

    #[test]
    fn title_has_readable_timestamp() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 9, 5, 0).unwrap();
        assert_eq!(
            with_title("RSS Digest", "body", &now),
            "# RSS Digest - 2026/10/18 09:05\n\nbody"
        );
    }
}
