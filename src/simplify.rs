//! Text simplification: strips quote tails, signature blocks, and
//! converts `text/html` bodies down to plain text for display
//! (used by the TEXT part classification step of MIME ingestion).
//!
//! Deliberately thin: a trait plus one straightforward implementation
//! covering top-posting quote detection, `-- \n` signature delimiters,
//! and footer stripping.

pub struct SimplifyResult {
    pub text: String,
    pub is_forwarded: bool,
}

pub trait Simplify {
    fn simplify(&self, text: &str, is_html: bool) -> SimplifyResult;
}

pub struct DefaultSimplify;

impl Simplify for DefaultSimplify {
    fn simplify(&self, text: &str, is_html: bool) -> SimplifyResult {
        let text = if is_html { html_to_plain(text) } else { text.to_string() };
        let is_forwarded = text.trim_start().starts_with("---------- Forwarded message");
        let without_footer = strip_signature(&text);
        let without_quote = strip_top_quote(&without_footer);
        SimplifyResult {
            text: without_quote.trim().to_string(),
            is_forwarded,
        }
    }
}

/// Cuts everything from the standard `-- ` signature delimiter onward
/// (RFC 3676 §4.3).
fn strip_signature(text: &str) -> String {
    let mut out = String::new();
    for line in text.lines() {
        if line == "-- " {
            break;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Drops a trailing top-posted quote block introduced by a line like
/// `On ... wrote:` followed by `>`-prefixed lines.
fn strip_top_quote(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        if (line.starts_with("On ") && line.ends_with("wrote:")) || line.starts_with('>') {
            let quote_follows = lines[i..].iter().skip(1).all(|l| l.trim().is_empty() || l.starts_with('>'));
            if quote_follows {
                return lines[..i].join("\n");
            }
        }
    }
    text.to_string()
}

/// A minimal, dependency-free HTML-to-text pass: strips tags, unescapes
/// the handful of entities that actually show up in mail bodies, and
/// collapses block-level tags to newlines. Not a general HTML renderer —
/// messenger bodies are simple by construction.
fn html_to_plain(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut tag_buf = String::new();
    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                tag_buf.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let tag = tag_buf.trim_start_matches('/').to_ascii_lowercase();
                if tag.starts_with("br") || tag.starts_with("p") || tag.starts_with("div") {
                    out.push('\n');
                }
            }
            _ if in_tag => tag_buf.push(c),
            _ => out.push(c),
        }
    }
    out.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
}
