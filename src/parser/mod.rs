//! Structured output parsers.
//!
//! Model responses are free text. The parsers here turn them into typed
//! results with line-oriented scanners that never fail: when no structure is
//! recognized, the raw text is kept in a fallback field so content is never
//! dropped.
//!
//! - [`parse_explanation`]: overview, steps, concepts, use cases, caveats
//! - [`parse_improvement`]: issues, suggestions, rewritten code, notes

mod explanation;
mod improvement;

pub use explanation::{ParsedExplanation, parse_explanation};
pub use improvement::{Issue, ParsedImprovement, Severity, Suggestion, parse_improvement};

/// Prefixes that mark a line as a list item.
const BULLETS: &[char] = &['-', '*', '•'];

/// Whether a (trimmed) line is a list item: `1.`, `-`, `*` or `•` followed by text.
pub(crate) fn is_list_item(line: &str) -> bool {
    list_marker_len(line).is_some()
}

/// Strip a leading list marker, returning the item text.
pub(crate) fn strip_list_marker(line: &str) -> &str {
    match list_marker_len(line) {
        Some(len) => line[len..].trim_start(),
        None => line,
    }
}

fn list_marker_len(line: &str) -> Option<usize> {
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if rest.starts_with(". ") || rest.starts_with(") ") {
            return Some(digits + 2);
        }
        return None;
    }
    let first = line.chars().next()?;
    if BULLETS.contains(&first) {
        let after = &line[first.len_utf8()..];
        // `**bold**` is emphasis, not a bullet
        if after.starts_with(char::is_whitespace) {
            return Some(first.len_utf8());
        }
    }
    None
}

/// Whether a line opens or closes a fenced code block.
pub(crate) fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

/// Remove markdown heading and emphasis decoration from a line.
pub(crate) fn strip_decoration(line: &str) -> &str {
    line.trim()
        .trim_start_matches('#')
        .trim()
        .trim_matches(|c| c == '*' || c == '_')
        .trim()
}

/// Extract the first fenced code block from `text`.
///
/// Returns the info-string language (if any) and the block body. An
/// unterminated fence runs to the end of the text.
pub fn extract_code_block(text: &str) -> Option<(Option<String>, String)> {
    let mut lines = text.lines();
    let opening = lines.by_ref().find(|l| is_fence(l))?;
    let info = opening.trim_start().trim_start_matches(['`', '~']).trim();
    let language = (!info.is_empty()).then(|| info.to_string());

    let body: Vec<&str> = lines.take_while(|l| !is_fence(l)).collect();
    Some((language, body.join("\n")))
}
