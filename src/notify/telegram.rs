// src/notify/telegram.rs
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{ChatTransport, MarkupMode, SendError};
use crate::config::TelegramConfig;

/// Telegram Bot API `sendMessage` client for a single chat.
#[derive(Clone)]
pub struct TelegramSender {
    api_url: String,
    chat_id: String,
    client: Client,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramSender {
    pub fn new(api_base: &str, bot_token: &str, chat_id: &str) -> Self {
        Self {
            api_url: format!("{}/bot{}", api_base.trim_end_matches('/'), bot_token),
            chat_id: chat_id.to_string(),
            client: Client::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(cfg: &TelegramConfig) -> Result<Self> {
        if cfg.bot_token.trim().is_empty() {
            return Err(anyhow!("Telegram bot token missing (set TELEGRAM_BOT_TOKEN)"));
        }
        if cfg.chat_id.trim().is_empty() {
            return Err(anyhow!("Telegram chat id missing (set TELEGRAM_CHAT_ID)"));
        }
        Ok(Self::new(&cfg.api_base, &cfg.bot_token, &cfg.chat_id)
            .with_timeout(cfg.send_timeout_secs))
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs.max(1));
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/sendMessage", self.api_url)
    }
}

#[async_trait]
impl ChatTransport for TelegramSender {
    async fn send_text(&self, text: &str, mode: MarkupMode) -> Result<(), SendError> {
        let mut form: Vec<(&str, &str)> = vec![("chat_id", self.chat_id.as_str()), ("text", text)];
        if let Some(pm) = mode.parse_mode() {
            form.push(("parse_mode", pm));
        }

        let rsp = self
            .client
            .post(self.endpoint())
            .timeout(self.timeout)
            .form(&form)
            .send()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        let body: ApiResponse = rsp
            .json()
            .await
            .map_err(|e| SendError::Transport(format!("unreadable response: {e}")))?;

        if !body.ok {
            let head: String = text.chars().take(50).collect();
            let desc = body.description.unwrap_or_else(|| "Unknown error".to_string());
            tracing::error!(description = %desc, text_head = %head, "telegram rejected message");
            return Err(SendError::Rejected(desc));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_includes_token() {
        let s = TelegramSender::new("https://api.telegram.org/", "123:abc", "42");
        assert_eq!(s.endpoint(), "https://api.telegram.org/bot123:abc/sendMessage");
    }

    #[test]
    fn missing_secrets_are_rejected() {
        let cfg = TelegramConfig {
            bot_token: String::new(),
            chat_id: "1".into(),
            api_base: "https://api.telegram.org".into(),
            send_timeout_secs: 30,
        };
        assert!(TelegramSender::from_config(&cfg).is_err());
    }

    #[test]
    fn configured_send_timeout_is_applied() {
        let cfg = TelegramConfig {
            bot_token: "123:abc".into(),
            chat_id: "42".into(),
            api_base: "https://api.telegram.org".into(),
            send_timeout_secs: 7,
        };
        let s = TelegramSender::from_config(&cfg).unwrap();
        assert_eq!(s.timeout, Duration::from_secs(7));
        assert_eq!(s.with_timeout(0).timeout, Duration::from_secs(1));
    }

    #[test]
    fn api_error_payload_parses() {
        let r: ApiResponse =
            serde_json::from_str(r#"{"ok":false,"error_code":400,"description":"Bad Request"}"#)
                .unwrap();
        assert!(!r.ok);
        assert_eq!(r.description.as_deref(), Some("Bad Request"));
    }
}
