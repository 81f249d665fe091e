//! Markup-to-text derivation for resume HTML.
//!
//! Parses the fragment with `scraper`, drops the content of non-visible
//! elements, joins the remaining text nodes with single spaces and collapses
//! runs of whitespace. Plain text without markup comes back unchanged apart
//! from whitespace collapsing, so applying [`html_to_text`] twice is the same
//! as applying it once.

use scraper::Html;

/// Elements whose text never reaches the derived plain text.
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Strip markup from `html` and return whitespace-normalized text.
///
/// Returns an empty string for blank input or markup with no visible text.
pub fn html_to_text(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    let document = Html::parse_document(html);
    let mut pieces: Vec<&str> = Vec::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map(|e| HIDDEN_ELEMENTS.contains(&e.name()))
                .unwrap_or(false)
        });
        if hidden {
            continue;
        }
        let piece = text.trim();
        if !piece.is_empty() {
            pieces.push(piece);
        }
    }

    collapse_whitespace(&pieces.join(" "))
}

/// Collapse every whitespace run to a single space and trim the ends.
pub fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim_end().to_string()
}
