// src/notify/mod.rs
pub mod chunk;
pub mod markdown;
pub mod telegram;

pub use chunk::{deliver, split_message, MESSAGE_LIMIT};
pub use telegram::TelegramSender;

use async_trait::async_trait;
use thiserror::Error;

/// How the text should be rendered by the chat API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkupMode {
    /// `#`/`##`/`-` line structure plus content escaping, sent as MarkdownV2.
    Structured,
    /// Content escaping only, sent as MarkdownV2.
    EscapeOnly,
    /// No parse mode, no escaping.
    Plain,
}

impl MarkupMode {
    pub fn parse_mode(self) -> Option<&'static str> {
        match self {
            MarkupMode::Structured | MarkupMode::EscapeOnly => Some("MarkdownV2"),
            MarkupMode::Plain => None,
        }
    }
}

/// Render `text` for the given mode before chunking.
pub fn prepare_text(text: &str, mode: MarkupMode) -> String {
    match mode {
        MarkupMode::Structured => markdown::to_markdown_v2(text),
        MarkupMode::EscapeOnly => markdown::escape_content(text),
        MarkupMode::Plain => text.to_string(),
    }
}

/// Failure of a single send call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("rejected by chat API: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("no content chunks were sent")]
    NothingToSend,
    #[error("chunk {index}/{total} failed after {sent} sent: {reason}")]
    ChunkFailed {
        index: usize,
        total: usize,
        sent: usize,
        reason: SendError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub chunks_sent: usize,
    pub total_chunks: usize,
}

/// One-message-at-a-time chat transport. Text is already rendered for `mode`
/// and within the message limit.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, text: &str, mode: MarkupMode) -> Result<(), SendError>;
    fn name(&self) -> &'static str;
}
