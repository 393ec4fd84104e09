use html5ever::tendril::TendrilSink;
use html5ever::{LocalName, parse_document};
use markup5ever_rcdom::{Handle, NodeData, RcDom};

use crate::error::ExtractError;

/// Word budget for extracted page text.
pub const MAX_WORDS: usize = 500;

/// Appended when the text was cut at `MAX_WORDS`.
pub const CONTINUATION_MARKER: &str = "...";

#[derive(Clone, Default, Debug)]
struct ExtractedText {
    title: String,
    title_done: bool,
    text: String,
}

#[derive(Debug, Clone, PartialEq, Copy)]
enum Context {
    Title,
    Body,
}

/// Parses raw page bytes and returns `(title, text)`.
///
/// Non-content containers are dropped before any text is collected. The body is
/// whitespace-normalized and capped at [`MAX_WORDS`].
pub fn extract(raw: &[u8]) -> Result<(String, String), ExtractError> {
    let dom = get_dom(raw)?;
    let mut out = ExtractedText::default();
    walk_html(&dom.document, Context::Body, &mut out);

    let title = normalize_whitespace(&out.title);
    let text = truncate_words(&normalize_whitespace(&out.text), MAX_WORDS);
    Ok((title, text))
}

fn get_dom(raw: &[u8]) -> Result<RcDom, ExtractError> {
    parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut std::io::Cursor::new(raw))
        .map_err(|e| ExtractError::Parse(e.to_string()))
}

fn is_non_content(local: &LocalName) -> bool {
    matches!(
        &**local,
        "script" | "style" | "noscript" | "template" | "nav" | "footer" | "header" | "aside"
    )
}

fn walk_html(handle: &Handle, ctx: Context, out: &mut ExtractedText) {
    match &handle.data {
        NodeData::Text { contents } => {
            let s = contents.borrow();
            match ctx {
                Context::Title => out.title.push_str(&s),
                Context::Body => {
                    out.text.push_str(&s);
                    out.text.push(' ');
                }
            }
        }
        NodeData::Element { name, .. } => {
            let local = &name.local;
            if is_non_content(local) {
                return;
            }

            if &**local == "title" {
                // the first non-empty <title> wins; later ones (e.g. inside <svg>) are dropped
                if !out.title_done {
                    out.title.clear();
                    for child in handle.children.borrow().iter() {
                        walk_html(child, Context::Title, out);
                    }
                    out.title_done = !out.title.trim().is_empty();
                }
                return;
            }

            for child in handle.children.borrow().iter() {
                walk_html(child, ctx, out);
            }
        }
        _ => {
            for child in handle.children.borrow().iter() {
                walk_html(child, ctx, out);
            }
        }
    }
}

/// Collapses every whitespace run to a single space and trims both ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Keeps the first `max_words` words, appending [`CONTINUATION_MARKER`] when cut.
pub fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_string();
    }
    let mut truncated = words[..max_words].join(" ");
    truncated.push_str(CONTINUATION_MARKER);
    truncated
}
