//! OpenAI-compatible Chat Completions provider.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{DynGenerator, GenerationRequest, GeneratorFactory, TextGenerator};
use crate::config::AiConfig;

const USER_AGENT: &str = "rss-digest/0.1";

pub struct OpenAiProvider {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .context("building completions http client")?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        })
    }
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}
#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
}
#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    choices: Vec<Choice>,
}
#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}
#[derive(Deserialize)]
struct ChoiceMsg {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl TextGenerator for OpenAiProvider {
    async fn generate(&self, req: &GenerationRequest) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(anyhow!("no API key configured"));
        }

        let body = Req {
            model: &req.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &req.system,
                },
                Msg {
                    role: "user",
                    content: &req.user,
                },
            ],
            temperature: req.temperature,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("completions request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            return Err(anyhow!("completions HTTP {status}: {snippet}"));
        }

        let parsed: Resp = resp.json().await.context("decoding completions response")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        Ok(content.trim().to_string())
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

/// Builds a new `OpenAiProvider` (with its own connection pool) per handle.
#[derive(Debug, Clone)]
pub struct OpenAiFactory {
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl OpenAiFactory {
    pub fn from_config(cfg: &AiConfig) -> Self {
        Self {
            base_url: cfg.base_url.clone(),
            api_key: cfg.api_key.clone(),
            timeout: Duration::from_secs(cfg.request_timeout_secs),
        }
    }
}

impl GeneratorFactory for OpenAiFactory {
    fn client(&self) -> Result<DynGenerator> {
        let p = OpenAiProvider::new(&self.base_url, &self.api_key, self.timeout)?;
        Ok(Box::new(p))
    }
}
