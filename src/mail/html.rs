//! Plain-text extraction from HTML mail bodies.
//!
//! Verification mails are short transactional HTML; a full DOM parser is not
//! worth the weight here. The pipeline is: strip tags, decode entities in a
//! single pass, collapse whitespace, trim.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Longest snippet we derive from a message body (characters, not bytes).
pub const SNIPPET_MAX_CHARS: usize = 160;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));
static ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#x?[0-9a-fA-F]+|[a-zA-Z]+);").expect("valid entity regex"));

/// Convert an HTML body to plain text.
///
/// Tags are removed before entities are decoded, and decoding is a single
/// left-to-right pass — `&amp;nbsp;` becomes the literal text `&nbsp;`, not a
/// non-breaking space. Unknown named entities are left untouched.
pub fn html_to_text(html: &str) -> String {
    let stripped = TAG_RE.replace_all(html, "");
    let decoded = decode_entities(&stripped);
    WS_RE.replace_all(&decoded, " ").trim().to_string()
}

/// Snippet for list views: the first [`SNIPPET_MAX_CHARS`] characters of the
/// plain text, falling back to the raw HTML when no text is derivable.
pub fn snippet(text: &str, html: &str) -> String {
    let source = if text.is_empty() { html } else { text };
    source.chars().take(SNIPPET_MAX_CHARS).collect()
}

fn decode_entities(input: &str) -> String {
    ENTITY_RE
        .replace_all(input, |caps: &Captures<'_>| {
            let body = &caps[1];
            match body {
                "amp" => "&".to_string(),
                "lt" => "<".to_string(),
                "gt" => ">".to_string(),
                "quot" => "\"".to_string(),
                "apos" => "'".to_string(),
                "nbsp" => "\u{a0}".to_string(),
                _ => decode_numeric(body).unwrap_or_else(|| caps[0].to_string()),
            }
        })
        .into_owned()
}

/// Decode `#NNN` / `#xHH` entity bodies. Returns None for named entities we
/// do not know and for out-of-range codepoints.
fn decode_numeric(body: &str) -> Option<String> {
    let digits = body.strip_prefix('#')?;
    let code = if let Some(hex) = digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        digits.parse::<u32>().ok()?
    };
    char::from_u32(code).map(|c| c.to_string())
}
