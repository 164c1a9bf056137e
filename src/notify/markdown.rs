// src/notify/markdown.rs
//! Converts the digest's small Markdown dialect (`# `, `## `, `- `, `**bold**`,
//! `[text](url)`) into Telegram MarkdownV2.
//!
//! Links and bold spans are swapped for NUL-delimited placeholders before the
//! reserved punctuation is escaped, then restored in MarkdownV2 form. Escaping
//! first would mangle `*`, `[`, `]`, `(` and `)`, which are reserved too.

use once_cell::sync::OnceCell;
use regex::{Captures, Regex};

/// Characters MarkdownV2 requires to be backslash-escaped outside entities.
const RESERVED: &[char] = &[
    '\\', '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

fn link_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    // URL part tolerates one level of balanced parentheses (wiki-style links).
    RE.get_or_init(|| Regex::new(r"\[([^\]]+)\]\(([^()]*(?:\([^()]*\)[^()]*)*)\)").unwrap())
}

fn bold_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap())
}

/// Backslash-escape every reserved character.
pub fn escape_reserved(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    for ch in text.chars() {
        if RESERVED.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Inside a link target only `\` and `)` need escaping.
fn escape_url(url: &str) -> String {
    url.replace('\\', "\\\\").replace(')', "\\)")
}

fn placeholder(kind: &str, n: usize) -> String {
    format!("\u{0}{kind}{n}\u{0}")
}

/// Escape one content string, keeping `**bold**` and `[text](url)` intact.
pub fn escape_content(text: &str) -> String {
    let cleaned = text.replace('\u{0}', "");

    let mut links: Vec<(String, String)> = Vec::new();
    let with_links = link_re().replace_all(&cleaned, |caps: &Captures| {
        links.push((caps[1].to_string(), caps[2].to_string()));
        placeholder("LINK", links.len() - 1)
    });

    let mut bolds: Vec<String> = Vec::new();
    let with_bolds = bold_re().replace_all(&with_links, |caps: &Captures| {
        bolds.push(caps[1].to_string());
        placeholder("BOLD", bolds.len() - 1)
    });

    let mut out = escape_reserved(&with_bolds);

    // Bold first: a bold span may itself hold a link placeholder.
    for (i, content) in bolds.iter().enumerate() {
        out = out.replace(
            &placeholder("BOLD", i),
            &format!("*{}*", escape_reserved(content)),
        );
    }
    for (i, (display, url)) in links.iter().enumerate() {
        out = out.replace(
            &placeholder("LINK", i),
            &format!("[{}]({})", escape_reserved(display), escape_url(url)),
        );
    }
    out
}

/// Line-by-line structure pass: headings become bold lines, bullets keep an
/// escaped dash, blank lines are preserved.
pub fn to_markdown_v2(text: &str) -> String {
    text.trim()
        .split('\n')
        .map(|line| {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("# ") {
                format!("*{}*", escape_content(rest))
            } else if let Some(rest) = line.strip_prefix("## ") {
                format!("*{}*", escape_content(rest))
            } else if let Some(rest) = line.strip_prefix("- ") {
                format!("\\- {}", escape_content(rest))
            } else if !line.is_empty() {
                escape_content(line)
            } else {
                String::new()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_bullet_bold_and_nested_link() {
        let input = "# Title\n\n- **Acme** did X [more](http://x.com/(y))";
        let out = to_markdown_v2(input);
        assert_eq!(out, "*Title*\n\n\\- *Acme* did X [more](http://x.com/(y\\))");
    }

    #[test]
    fn plain_punctuation_is_escaped() {
        assert_eq!(escape_content("v1.2 (beta)! a_b"), "v1\\.2 \\(beta\\)\\! a\\_b");
    }

    #[test]
    fn subtitle_becomes_bold_and_blank_lines_survive() {
        let out = to_markdown_v2("## AI & Chips\n\nplain line.");
        assert_eq!(out, "*AI & Chips*\n\nplain line\\.");
    }

    #[test]
    fn bold_and_link_contents_are_escaped_inside() {
        let out = escape_content("**U.S.** see [Reuters.com](https://r.com/a_b)");
        assert_eq!(out, "*U\\.S\\.* see [Reuters\\.com](https://r.com/a_b)");
    }

    #[test]
    fn link_inside_bold_is_restored() {
        let out = escape_content("**see [x](http://a.b)**");
        assert_eq!(out, "*see [x](http://a.b)*");
    }

    #[test]
    fn stray_asterisk_and_backslash_escaped() {
        assert_eq!(escape_content("a*b\\c"), "a\\*b\\\\c");
    }
}
