// src/config/prompts.rs
//! Built-in prompt templates. Both can be replaced through
//! `stage1_prompt_path` / `stage2_prompt_path` in the config file.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

/// System instructions for per-article extraction (stage 1).
pub const DEFAULT_STAGE1_PROMPT: &str = "\
You are a senior news editor. The input is one complete article (title, source, body). \
Extract its key points.

Rules:
1. Produce 1-3 bullet points ordered by importance; fewer if the article carries less, never invent facts.
2. Each bullet follows \"**Subject** + action + purpose/impact\", at most 40 words.
3. The subject must be a concrete company, institution or product name; keep English company names as-is.
4. Keep only new information; skip background and opinion.
5. End with suggested categories: [AI] [Semi] [Smartphone] [Other Tech] [World News] [Misc] (multiple allowed).

Output format:
- **Subject** what happened
- ...
[Categories: AI, Smartphone]";

/// System instructions for the batch aggregation (stage 2).
pub const DEFAULT_STAGE2_PROMPT: &str = "\
You are a senior news editor who condenses a large batch of article notes into one digest. \
Group points under `## Category` headings, write each point as a `- ` bullet that starts with a \
**bold subject**, merge points that describe the same event, and link the source with [source](url). \
Drop any point that is already covered in the recently sent digests supplied as history.";

/// Reads a prompt override from disk, falling back to `default` when the path is
/// absent or unreadable.
pub fn load_prompt(path: Option<&Path>, default: &str, label: &str) -> String {
    let Some(path) = path else {
        return default.to_string();
    };
    match fs::read_to_string(path) {
        Ok(s) if !s.trim().is_empty() => {
            info!(prompt = label, path = %path.display(), "loaded prompt override");
            s
        }
        Ok(_) => {
            warn!(prompt = label, path = %path.display(), "prompt file is empty, using default");
            default.to_string()
        }
        Err(e) => {
            warn!(prompt = label, path = %path.display(), error = %e, "prompt file unreadable, using default");
            default.to_string()
        }
    }
}
