// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod aggregate;
pub mod ai;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod notify;
pub mod pipeline;
pub mod state;
pub mod summarize;

// ---- Re-exports for stable public API ----
pub use crate::config::DigestConfig;
pub use crate::ingest::{Item, ItemSource};
pub use crate::notify::{ChatTransport, MarkupMode};
pub use crate::pipeline::{DigestPipeline, RunReport, RunStatus};
