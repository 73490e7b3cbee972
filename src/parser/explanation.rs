//! Explanation parser.
//!
//! A line scanner whose state is the section currently being filled. Heading
//! lines that name a section switch state; every other non-empty line is
//! routed to the active section. Text before the first heading belongs to the
//! overview. If the scan ends without any recognized heading, or with every
//! section empty, the whole input becomes the overview.

use serde::{Deserialize, Serialize};

use super::{is_fence, is_list_item, strip_decoration, strip_list_marker};

/// Structured explanation of a code snippet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedExplanation {
    pub overview: String,
    pub steps: Vec<String>,
    pub concepts: Vec<String>,
    pub use_cases: Vec<String>,
    pub considerations: Vec<String>,
}

impl ParsedExplanation {
    fn is_empty(&self) -> bool {
        self.overview.is_empty()
            && self.steps.is_empty()
            && self.concepts.is_empty()
            && self.use_cases.is_empty()
            && self.considerations.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Overview,
    Steps,
    Concepts,
    UseCases,
    Considerations,
}

/// Words allowed in an undecorated or bold heading phrase besides the
/// section keyword itself.
const HEADING_WORDS: &[&str] = &[
    "a", "additional", "and", "breakdown", "by", "case", "cases", "caveat", "caveats", "code",
    "common", "concept", "concepts", "consideration", "considerations", "core", "design",
    "explanation", "high", "how", "important", "it", "key", "level", "main", "notable", "of",
    "other", "overview", "pattern", "patterns", "possible", "potential", "programming", "real",
    "step", "steps", "the", "typical", "use", "used", "works", "world",
];

/// A recognized heading and any text that follows it on the same line.
#[derive(Debug, PartialEq, Eq)]
struct Heading<'a> {
    section: Section,
    rest: Option<&'a str>,
}

impl Section {
    /// Section whose keyword appears in `phrase`.
    fn from_keywords(phrase: &str) -> Option<Self> {
        let lower = phrase.to_lowercase();
        if lower.contains("overview") || lower.contains("high-level") || lower.contains("high level")
        {
            Some(Section::Overview)
        } else if lower.contains("step-by-step")
            || lower.contains("step by step")
            || lower.contains("how it works")
        {
            Some(Section::Steps)
        } else if lower.contains("concept") || lower.contains("pattern") {
            Some(Section::Concepts)
        } else if lower.contains("use case") || lower.contains("use-case") {
            Some(Section::UseCases)
        } else if lower.contains("consideration") || lower.contains("caveat") {
            Some(Section::Considerations)
        } else {
            None
        }
    }

    /// Section named by `phrase` when the phrase is nothing but a heading title.
    fn from_title(phrase: &str) -> Option<Self> {
        let lower = phrase.to_lowercase();
        let only_heading_words = lower
            .split(|c: char| c.is_whitespace() || c == '-' || c == '/' || c == '&' || c == ',')
            .filter(|w| !w.is_empty())
            .all(|w| HEADING_WORDS.contains(&w));
        if only_heading_words {
            Self::from_keywords(phrase)
        } else {
            None
        }
    }
}

/// Recognize a heading line.
///
/// Three forms count: a markdown `#` heading, a bold title (`**Key
/// Concepts**`, optionally after a list marker and followed by text), and a
/// bare title ending in `:` (`Key concepts:`). Plain list items and prose
/// are content, whatever words they contain.
fn heading(line: &str) -> Option<Heading<'_>> {
    let trimmed = line.trim();

    if trimmed.starts_with('#') {
        let section = Section::from_keywords(strip_decoration(trimmed))?;
        return Some(Heading { section, rest: None });
    }

    let body = strip_list_marker(trimmed);
    if let Some(inner) = body.strip_prefix("**")
        && let Some(close) = inner.find("**")
    {
        let title = inner[..close].trim().trim_end_matches(':');
        let section = Section::from_title(title)?;
        let rest = inner[close + 2..].trim_start_matches(':').trim();
        return Some(Heading {
            section,
            rest: (!rest.is_empty()).then_some(rest),
        });
    }

    if is_list_item(trimmed) {
        return None;
    }
    let title = trimmed.strip_suffix(':')?;
    let section = Section::from_title(title)?;
    Some(Heading { section, rest: None })
}

struct Scanner {
    state: Section,
    in_fence: bool,
    saw_heading: bool,
    overview: Vec<String>,
    result: ParsedExplanation,
}

impl Scanner {
    fn new() -> Self {
        Self {
            state: Section::Overview,
            in_fence: false,
            saw_heading: false,
            overview: Vec::new(),
            result: ParsedExplanation::default(),
        }
    }

    fn list(&mut self) -> Option<&mut Vec<String>> {
        match self.state {
            Section::Overview => None,
            Section::Steps => Some(&mut self.result.steps),
            Section::Concepts => Some(&mut self.result.concepts),
            Section::UseCases => Some(&mut self.result.use_cases),
            Section::Considerations => Some(&mut self.result.considerations),
        }
    }

    fn feed(&mut self, raw: &str) {
        if is_fence(raw) {
            self.in_fence = !self.in_fence;
            self.append_verbatim(raw);
            return;
        }
        if self.in_fence {
            self.append_verbatim(raw);
            return;
        }

        let line = raw.trim();
        if line.is_empty() {
            return;
        }
        if let Some(heading) = heading(line) {
            self.state = heading.section;
            self.saw_heading = true;
            if let Some(rest) = heading.rest {
                self.push(rest);
            }
            return;
        }
        self.push(line);
    }

    fn push(&mut self, line: &str) {
        match self.list() {
            None => self.overview.push(line.to_string()),
            Some(items) => items.push(strip_list_marker(line).to_string()),
        }
    }

    /// Code inside a fence is kept as-is and attached to the current entry.
    fn append_verbatim(&mut self, raw: &str) {
        match self.list() {
            None => self.overview.push(raw.to_string()),
            Some(items) => match items.last_mut() {
                Some(last) => {
                    last.push('\n');
                    last.push_str(raw);
                }
                None => items.push(raw.to_string()),
            },
        }
    }

    fn finish(mut self, raw: &str) -> ParsedExplanation {
        self.result.overview = self.overview.join("\n");
        if !self.saw_heading || self.result.is_empty() {
            return ParsedExplanation {
                overview: raw.to_string(),
                ..ParsedExplanation::default()
            };
        }
        self.result
    }
}

/// Parse a model's explanation into sections.
pub fn parse_explanation(text: &str) -> ParsedExplanation {
    let mut scanner = Scanner::new();
    for line in text.lines() {
        scanner.feed(line);
    }
    scanner.finish(text)
}
