// src/config/mod.rs
pub mod digest;
pub mod prompts;

pub use digest::{AiConfig, DigestConfig, PipelineConfig, TelegramConfig};
