// src/notify/chunk.rs
//! Splits escaped text under the per-message limit and sends the pieces in order.

use metrics::counter;
use tracing::{error, info};

use super::{prepare_text, ChatTransport, DeliveryError, DeliveryReport, MarkupMode};

/// Telegram's hard limit for one message.
pub const MESSAGE_LIMIT: usize = 4096;

/// Split `text` into chunks of at most `limit` characters.
///
/// Paragraph breaks are preferred, then line breaks; a single line longer than
/// the limit is cut at fixed character offsets. Delimiters stay inside the
/// chunks, so concatenating the output gives back the input.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for piece in pieces(text, limit) {
        let len = piece.chars().count();
        if current_len + len <= limit {
            current.push_str(&piece);
            current_len += len;
            continue;
        }
        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        current = piece;
        current_len = len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Atomic pieces no longer than `limit`: paragraphs, else lines, else slices.
fn pieces(text: &str, limit: usize) -> Vec<String> {
    let mut out = Vec::new();
    for (pi, para) in text.split("\n\n").enumerate() {
        if pi > 0 {
            out.push("\n\n".to_string());
        }
        if para.chars().count() <= limit {
            out.push(para.to_string());
            continue;
        }
        for (li, line) in para.split('\n').enumerate() {
            if li > 0 {
                out.push("\n".to_string());
            }
            if line.chars().count() <= limit {
                out.push(line.to_string());
            } else {
                out.extend(force_split(line, limit));
            }
        }
    }
    out.retain(|p| !p.is_empty());
    out
}

/// Fixed-width slices, except that a cut never lands between a MarkdownV2
/// escape backslash and the character it escapes.
fn force_split(line: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let mut out = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let mut end = (start + limit).min(chars.len());
        if end < chars.len() {
            let trailing = chars[start..end]
                .iter()
                .rev()
                .take_while(|c| **c == '\\')
                .count();
            if trailing % 2 == 1 && end - start > 1 {
                end -= 1;
            }
        }
        out.push(chars[start..end].iter().collect());
        start = end;
    }
    out
}

/// Escape according to `mode`, split, and send chunk by chunk. Stops at the
/// first failed chunk; chunks already sent stay sent.
pub async fn deliver(
    transport: &dyn ChatTransport,
    text: &str,
    mode: MarkupMode,
) -> Result<DeliveryReport, DeliveryError> {
    let prepared = prepare_text(text, mode);
    info!(
        original_len = text.chars().count(),
        prepared_len = prepared.chars().count(),
        transport = transport.name(),
        "preparing message"
    );

    let chunks = split_message(&prepared, MESSAGE_LIMIT);
    let total = chunks.len();
    if total > 1 {
        info!(chunks = total, "message exceeds limit, splitting");
    }

    let mut sent = 0usize;
    for (i, chunk) in chunks.iter().enumerate() {
        if chunk.trim().is_empty() {
            continue;
        }
        info!(chunk = i + 1, total, len = chunk.chars().count(), "sending chunk");
        if let Err(reason) = transport.send_text(chunk, mode).await {
            error!(chunk = i + 1, total, %reason, "chunk failed, stopping further sends");
            counter!("digest_delivery_failures_total").increment(1);
            return Err(DeliveryError::ChunkFailed {
                index: i + 1,
                total,
                sent,
                reason,
            });
        }
        sent += 1;
        counter!("digest_delivery_chunks_total").increment(1);
    }

    if sent == 0 {
        return Err(DeliveryError::NothingToSend);
    }
    Ok(DeliveryReport {
        chunks_sent: sent,
        total_chunks: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_message("hello", 10), vec!["hello".to_string()]);
    }

    #[test]
    fn paragraphs_pack_under_limit() {
        let text = "aaaa\n\nbbbb\n\ncccc";
        let chunks = split_message(text, 10);
        assert_eq!(chunks, vec!["aaaa\n\nbbbb", "\n\ncccc"]);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn long_paragraph_falls_back_to_lines() {
        let text = "1111\n2222\n3333";
        let chunks = split_message(text, 9);
        assert!(chunks.iter().all(|c| c.chars().count() <= 9));
        assert_eq!(chunks.concat(), text);
        assert_eq!(chunks[0], "1111\n2222");
    }

    #[test]
    fn oversized_line_is_force_split() {
        let text = "x".repeat(25);
        let chunks = split_message(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(chunks[2].len(), 5);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn forced_cut_keeps_escape_with_its_character() {
        // 9 plain chars, then an escaped dot straddling the 10-char boundary.
        let text = format!("{}\\.{}", "a".repeat(9), "b".repeat(8));
        let chunks = split_message(&text, 10);
        assert_eq!(chunks[0], "a".repeat(9));
        assert!(chunks[1].starts_with("\\."));
        assert!(chunks.iter().all(|c| !c.ends_with('\\')));
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn escaped_backslash_pair_is_not_moved() {
        // A doubled backslash is a complete escape; the cut after it stays put.
        let text = format!("{}\\\\{}", "a".repeat(8), "b".repeat(5));
        let chunks = split_message(&text, 10);
        assert_eq!(chunks[0], format!("{}\\\\", "a".repeat(8)));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn multibyte_text_counts_characters() {
        let text = "摘".repeat(12);
        let chunks = split_message(&text, 5);
        assert!(chunks.iter().all(|c| c.chars().count() <= 5));
        assert_eq!(chunks.concat(), text);
    }
}
