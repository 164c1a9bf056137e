// src/config/digest.rs
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{env, fs};

use anyhow::Context;
use tracing::{debug, warn};

use super::prompts::{load_prompt, DEFAULT_STAGE1_PROMPT, DEFAULT_STAGE2_PROMPT};

pub const ENV_CONFIG_PATH: &str = "DIGEST_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/digest.toml";

/// Marker value meaning "read this secret from the environment".
const ENV_MARKER: &str = "ENV";

fn default_db_path() -> PathBuf {
    PathBuf::from("data/users/default/db.sqlite")
}
fn default_state_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_hours_back() -> u32 {
    24
}
fn default_title() -> String {
    "RSS Digest".to_string()
}
fn default_env_marker() -> String {
    ENV_MARKER.to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_stage2_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_stage1_temperature() -> f32 {
    0.1
}
fn default_stage2_temperature() -> f32 {
    1.0
}
fn default_request_timeout_secs() -> u64 {
    120
}
fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}
fn default_send_timeout_secs() -> u64 {
    30
}
fn default_max_workers() -> usize {
    5
}
fn default_attempts() -> u32 {
    2
}
fn default_history_limit() -> usize {
    10
}
fn default_retention_hours() -> i64 {
    48
}
fn default_failure_markers() -> Vec<String> {
    vec!["Failed to generate digest".to_string(), "无法生成摘要".to_string()]
}

/// Process-wide configuration, built once in `main` and passed down by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestConfig {
    #[serde(default = "default_db_path")]
    pub freshrss_db_path: PathBuf,
    /// Directory holding `processed_entry_ids.json` and `digest_history.json`.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_hours_back")]
    pub hours_back: u32,
    #[serde(default = "default_title")]
    pub digest_title: String,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// OpenAI-compatible endpoint, without the `/chat/completions` suffix.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// "ENV" means: read from AI_API_KEY, then OPENAI_API_KEY.
    #[serde(default = "default_env_marker")]
    pub api_key: String,
    /// Falls back to `stage2_model` when unset.
    #[serde(default)]
    pub stage1_model: Option<String>,
    #[serde(default = "default_stage2_model")]
    pub stage2_model: String,
    #[serde(default = "default_stage1_temperature")]
    pub stage1_temperature: f32,
    #[serde(default = "default_stage2_temperature")]
    pub stage2_temperature: f32,
    /// Deadline for a single text-generation call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub stage1_prompt_path: Option<PathBuf>,
    #[serde(default)]
    pub stage2_prompt_path: Option<PathBuf>,
    #[serde(skip)]
    pub stage1_prompt: String,
    #[serde(skip)]
    pub stage2_prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// "ENV" means: read from TELEGRAM_BOT_TOKEN.
    #[serde(default = "default_env_marker")]
    pub bot_token: String,
    /// "ENV" means: read from TELEGRAM_CHAT_ID.
    #[serde(default = "default_env_marker")]
    pub chat_id: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Deadline for one `sendMessage` call.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_workers")]
    pub stage1_max_workers: usize,
    /// Attempts per article summary.
    #[serde(default = "default_attempts")]
    pub stage1_max_attempts: u32,
    /// Attempts of the whole summarize → aggregate → validate sequence.
    #[serde(default = "default_attempts")]
    pub generate_max_attempts: u32,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_retention_hours")]
    pub processed_retention_hours: i64,
    /// Substrings that mark a generated digest as unusable.
    #[serde(default = "default_failure_markers")]
    pub failure_markers: Vec<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: default_env_marker(),
            stage1_model: None,
            stage2_model: default_stage2_model(),
            stage1_temperature: default_stage1_temperature(),
            stage2_temperature: default_stage2_temperature(),
            request_timeout_secs: default_request_timeout_secs(),
            stage1_prompt_path: None,
            stage2_prompt_path: None,
            stage1_prompt: DEFAULT_STAGE1_PROMPT.to_string(),
            stage2_prompt: DEFAULT_STAGE2_PROMPT.to_string(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: default_env_marker(),
            chat_id: default_env_marker(),
            api_base: default_api_base(),
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage1_max_workers: default_max_workers(),
            stage1_max_attempts: default_attempts(),
            generate_max_attempts: default_attempts(),
            history_limit: default_history_limit(),
            processed_retention_hours: default_retention_hours(),
            failure_markers: default_failure_markers(),
        }
    }
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            freshrss_db_path: default_db_path(),
            state_dir: default_state_dir(),
            hours_back: default_hours_back(),
            digest_title: default_title(),
            ai: AiConfig::default(),
            telegram: TelegramConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl DigestConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading digest config from {}", path.display()))?;
        let cfg: DigestConfig = toml::from_str(&data)
            .with_context(|| format!("parsing digest config {}", path.display()))?;
        Ok(cfg.finalize())
    }

    /// Resolution order:
    /// 1) $DIGEST_CONFIG_PATH (must exist)
    /// 2) config/digest.toml
    /// 3) built-in defaults
    pub fn load_default() -> anyhow::Result<Self> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                anyhow::bail!("{ENV_CONFIG_PATH} points to non-existent path {}", pb.display());
            }
            return Self::load_from_file(pb);
        }
        let fallback = PathBuf::from(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            return Self::load_from_file(fallback);
        }
        debug!("no digest config file found, using defaults");
        Ok(Self::default().finalize())
    }

    /// Resolves "ENV" secrets, sanitizes numeric ranges and reads prompt overrides.
    pub fn finalize(mut self) -> Self {
        self.ai.api_key = resolve_secret(&self.ai.api_key, &["AI_API_KEY", "OPENAI_API_KEY"]);
        self.telegram.bot_token = resolve_secret(&self.telegram.bot_token, &["TELEGRAM_BOT_TOKEN"]);
        self.telegram.chat_id = resolve_secret(&self.telegram.chat_id, &["TELEGRAM_CHAT_ID"]);

        self.ai.stage1_temperature = sanitize_temperature(
            self.ai.stage1_temperature,
            default_stage1_temperature(),
        );
        self.ai.stage2_temperature = sanitize_temperature(
            self.ai.stage2_temperature,
            default_stage2_temperature(),
        );
        if self.ai.request_timeout_secs == 0 {
            self.ai.request_timeout_secs = default_request_timeout_secs();
        }

        let p = &mut self.pipeline;
        p.stage1_max_workers = p.stage1_max_workers.max(1);
        p.stage1_max_attempts = p.stage1_max_attempts.max(1);
        p.generate_max_attempts = p.generate_max_attempts.max(1);
        if p.history_limit == 0 {
            p.history_limit = default_history_limit();
        }
        if p.processed_retention_hours <= 0 {
            p.processed_retention_hours = default_retention_hours();
        }
        p.failure_markers.retain(|m| !m.trim().is_empty());

        self.ai.stage1_prompt = load_prompt(
            self.ai.stage1_prompt_path.as_deref(),
            DEFAULT_STAGE1_PROMPT,
            "stage1",
        );
        self.ai.stage2_prompt = load_prompt(
            self.ai.stage2_prompt_path.as_deref(),
            DEFAULT_STAGE2_PROMPT,
            "stage2",
        );
        self
    }

    pub fn stage1_model(&self) -> &str {
        self.ai
            .stage1_model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(&self.ai.stage2_model)
    }

    pub fn processed_ids_path(&self) -> PathBuf {
        self.state_dir.join("processed_entry_ids.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.state_dir.join("digest_history.json")
    }
}

fn resolve_secret(value: &str, vars: &[&str]) -> String {
    if !value.trim().eq_ignore_ascii_case(ENV_MARKER) {
        return value.to_string();
    }
    for var in vars {
        if let Ok(v) = env::var(var) {
            if !v.trim().is_empty() {
                return v;
            }
        }
    }
    warn!(vars = ?vars, "secret requested from environment but not set");
    String::new()
}

fn sanitize_temperature(t: f32, fallback: f32) -> f32 {
    if t.is_finite() && (0.0..=2.0).contains(&t) {
        t
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg: DigestConfig = toml::from_str("").unwrap();
        let cfg = cfg.finalize();
        assert_eq!(cfg.hours_back, 24);
        assert_eq!(cfg.pipeline.history_limit, 10);
        assert_eq!(cfg.pipeline.processed_retention_hours, 48);
        assert_eq!(cfg.pipeline.failure_markers.len(), 2);
        assert_eq!(cfg.stage1_model(), "gpt-4o-mini");
        assert!(!cfg.ai.stage1_prompt.is_empty());
    }

    #[test]
    fn sanitize_clamps_bad_values() {
        let raw = r#"
            [ai]
            api_key = "k"
            stage1_model = "small"
            stage1_temperature = 9.0
            stage2_temperature = 0.7

            [pipeline]
            stage1_max_workers = 0
            history_limit = 0
            failure_markers = ["", "BROKEN"]
        "#;
        let cfg: DigestConfig = toml::from_str(raw).unwrap();
        let cfg = cfg.finalize();
        assert_eq!(cfg.ai.api_key, "k");
        assert_eq!(cfg.stage1_model(), "small");
        assert_eq!(cfg.ai.stage1_temperature, 0.1);
        assert_eq!(cfg.ai.stage2_temperature, 0.7);
        assert_eq!(cfg.pipeline.stage1_max_workers, 1);
        assert_eq!(cfg.pipeline.history_limit, 10);
        assert_eq!(cfg.pipeline.failure_markers, vec!["BROKEN".to_string()]);
    }

    #[serial_test::serial]
    #[test]
    fn env_marker_resolves_secrets() {
        env::set_var("TELEGRAM_BOT_TOKEN", "123:abc");
        env::set_var("TELEGRAM_CHAT_ID", "-10042");
        let cfg = DigestConfig::default().finalize();
        assert_eq!(cfg.telegram.bot_token, "123:abc");
        assert_eq!(cfg.telegram.chat_id, "-10042");
        env::remove_var("TELEGRAM_BOT_TOKEN");
        env::remove_var("TELEGRAM_CHAT_ID");
    }

    #[test]
    fn state_paths_live_under_state_dir() {
        let cfg = DigestConfig {
            state_dir: PathBuf::from("/tmp/digest-state"),
            ..DigestConfig::default()
        };
        assert_eq!(
            cfg.processed_ids_path(),
            PathBuf::from("/tmp/digest-state/processed_entry_ids.json")
        );
        assert_eq!(
            cfg.history_path(),
            PathBuf::from("/tmp/digest-state/digest_history.json")
        );
    }
}
