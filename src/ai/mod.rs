//! Text-generation abstraction: request type, client trait and the factory that
//! hands out one independent client per concurrent task.

pub mod openai;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::AiConfig;
pub use openai::{OpenAiFactory, OpenAiProvider};

/// One chat-completion style request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: f32,
}

/// A single client handle. Implementations return the generated text trimmed;
/// an empty string is a valid (if useless) response, errors are transport or
/// API failures.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, req: &GenerationRequest) -> Result<String>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynGenerator = Box<dyn TextGenerator>;

/// Builds client handles. Stage 1 asks for a fresh handle per article so no
/// client state is shared between concurrent tasks.
pub trait GeneratorFactory: Send + Sync {
    fn client(&self) -> Result<DynGenerator>;
}

pub type SharedFactory = Arc<dyn GeneratorFactory>;

/// * If `AI_TEST_MODE=mock`, returns a deterministic mock factory.
/// * Else builds the OpenAI-compatible provider from config.
pub fn build_factory(cfg: &AiConfig) -> SharedFactory {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        tracing::warn!(target: "api", "AI_TEST_MODE=mock, using fixed generator");
        return Arc::new(MockFactory {
            fixed: "- **Mock** produced a placeholder point\n[Categories: Misc]".to_string(),
        });
    }
    Arc::new(OpenAiFactory::from_config(cfg))
}

/// Returns the same text for every request.
#[derive(Clone)]
pub struct MockGenerator {
    pub fixed: String,
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, _req: &GenerationRequest) -> Result<String> {
        Ok(self.fixed.clone())
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

#[derive(Clone)]
pub struct MockFactory {
    pub fixed: String,
}

impl GeneratorFactory for MockFactory {
    fn client(&self) -> Result<DynGenerator> {
        Ok(Box::new(MockGenerator {
            fixed: self.fixed.clone(),
        }))
    }
}
