// src/ingest/mod.rs
pub mod freshrss;
pub mod types;

pub use freshrss::FreshRssSource;
pub use types::{Item, ItemSource};

/// Turn feed HTML into plain text: decode entities, strip tags, collapse whitespace.
/// No length cap; article bodies are summarized in full.
pub fn normalize_text(s: &str) -> String {
    // 1) Block-level tags become line breaks so paragraphs don't glue together
    static RE_BLOCK: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_block = RE_BLOCK
        .get_or_init(|| regex::Regex::new(r"(?i)<\s*(br|/p|/div|/li|/h[1-6])\s*/?>").unwrap());
    let out = re_block.replace_all(s, "\n");

    // 2) Strip remaining tags
    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    let out = re_tags.replace_all(&out, "");

    // 3) HTML entity decode (after tag strip so decoded `<` is kept as text)
    let out = html_escape::decode_html_entities(&out).to_string();

    // 4) Collapse horizontal whitespace per line, drop empty lines
    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"[^\S\n]+").unwrap());
    out.lines()
        .map(|l| re_ws.replace_all(l, " ").trim().to_string())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_strips_markup_and_whitespace() {
        let s = "<p>Hello,&nbsp;&nbsp; <b>world</b></p><p>  Second\tline &amp; more</p>";
        assert_eq!(normalize_text(s), "Hello, world\nSecond line & more");
    }

    #[test]
    fn decoded_angle_brackets_survive() {
        assert_eq!(normalize_text("a &lt;tag&gt; b"), "a <tag> b");
    }
}
