//! Improvement (code review) parser.
//!
//! Parsing runs in two passes:
//!
//! 1. A splitter cuts the text into sections at markdown headings and
//!    numbered items, never inside a fenced code block.
//! 2. A classifier walks the sections with the kind set by the most recent
//!    heading as its state. Numbered items inherit that kind; headings set it
//!    from their own keywords. Each section is then mined according to its
//!    kind.
//!
//! Under an issue heading each bullet is its own issue.
//!
//! When neither an issue nor a suggestion was found, a single generic
//! suggestion carrying the whole raw text is synthesized.

use serde::{Deserialize, Serialize};

use super::{extract_code_block, is_fence, is_list_item, strip_decoration, strip_list_marker};

/// How serious a reported issue is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Infer severity from keywords in a section.
    fn infer(lower: &str) -> Self {
        if lower.contains("critical") {
            Severity::Critical
        } else if lower.contains("high") {
            Severity::High
        } else if lower.contains("medium") {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

/// A problem found in the reviewed code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub issue_type: String,
    pub description: String,
    pub severity: Severity,
}

/// A proposed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub category: String,
    pub suggestion: String,
    pub rationale: String,
}

/// Structured code review.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedImprovement {
    pub issues: Vec<Issue>,
    pub suggestions: Vec<Suggestion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refactored_code: Option<String>,
    pub performance_notes: Vec<String>,
    pub security_notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Issue,
    Suggestion,
    Code,
    Performance,
    Security,
}

impl Kind {
    fn classify(lower: &str) -> Option<Self> {
        if lower.contains("issue") || lower.contains("problem") {
            Some(Kind::Issue)
        } else if lower.contains("suggestion") || lower.contains("improvement") {
            Some(Kind::Suggestion)
        } else if lower.contains("refactored") || lower.contains("improved code") {
            Some(Kind::Code)
        } else if lower.contains("performance") {
            Some(Kind::Performance)
        } else if lower.contains("security") {
            Some(Kind::Security)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Preamble,
    Heading,
    Numbered,
}

#[derive(Debug)]
struct Chunk<'a> {
    boundary: Boundary,
    lines: Vec<&'a str>,
}

impl Chunk<'_> {
    fn first_line(&self) -> &str {
        self.lines.first().copied().unwrap_or_default()
    }

    fn body(&self) -> &[&str] {
        match self.boundary {
            Boundary::Preamble => &self.lines,
            _ => self.lines.get(1..).unwrap_or_default(),
        }
    }

    fn text(&self) -> String {
        self.lines.join("\n")
    }
}

fn boundary_of(line: &str) -> Option<Boundary> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        Some(Boundary::Heading)
    } else if trimmed.starts_with(|c: char| c.is_ascii_digit()) && is_list_item(trimmed) {
        Some(Boundary::Numbered)
    } else {
        None
    }
}

fn split_sections(text: &str) -> Vec<Chunk<'_>> {
    let mut chunks = vec![Chunk {
        boundary: Boundary::Preamble,
        lines: Vec::new(),
    }];
    let mut in_fence = false;

    for line in text.lines() {
        if is_fence(line) {
            in_fence = !in_fence;
        } else if !in_fence && let Some(boundary) = boundary_of(line) {
            chunks.push(Chunk {
                boundary,
                lines: vec![line],
            });
            continue;
        }
        if let Some(current) = chunks.last_mut() {
            current.lines.push(line);
        }
    }

    chunks.retain(|c| c.lines.iter().any(|l| !l.trim().is_empty()));
    chunks
}

/// Clean a line for label extraction: list marker, heading marks and bold removed.
fn clean(line: &str) -> String {
    strip_decoration(strip_list_marker(line.trim())).replace("**", "")
}

/// First `label: text` pair among `lines`, with severity read from `context`.
fn first_issue(lines: &[&str], context: &str) -> Option<Issue> {
    let lower = context.to_lowercase();
    lines.iter().filter(|l| !is_fence(l)).find_map(|line| {
        let cleaned = clean(line);
        let (label, description) = cleaned.split_once(':')?;
        let label = label.trim();
        let description = description.trim();
        if label.is_empty() || label.len() > 40 || description.is_empty() {
            return None;
        }
        Some(Issue {
            issue_type: label.to_string(),
            description: description.to_string(),
            severity: Severity::infer(&lower),
        })
    })
}

/// Bullet items of a section body, each with its continuation lines.
fn bullet_items<'a>(body: &[&'a str]) -> Vec<Vec<&'a str>> {
    let mut items: Vec<Vec<&'a str>> = Vec::new();
    let mut in_fence = false;
    for &line in body {
        if is_fence(line) {
            in_fence = !in_fence;
        }
        if !in_fence && is_list_item(line.trim()) {
            items.push(vec![line]);
        } else if let Some(item) = items.last_mut() {
            item.push(line);
        }
    }
    items
}

/// Issues of a section: one per bullet under a heading, otherwise the first
/// `label: text` pair.
fn extract_issues(chunk: &Chunk<'_>) -> Vec<Issue> {
    let items = match chunk.boundary {
        Boundary::Numbered => Vec::new(),
        _ => bullet_items(chunk.body()),
    };
    if items.is_empty() {
        return first_issue(&chunk.lines, &chunk.text()).into_iter().collect();
    }

    let heading = match chunk.boundary {
        Boundary::Heading => chunk.first_line(),
        _ => "",
    };
    items
        .iter()
        .filter_map(|item| first_issue(item, &format!("{heading}\n{}", item.join("\n"))))
        .collect()
}

/// Category from the heading, then suggestion and rationale split on a dash.
fn extract_suggestion(chunk: &Chunk<'_>) -> Option<Suggestion> {
    let (heading, body) = match chunk.boundary {
        Boundary::Preamble => (String::new(), chunk.lines.as_slice()),
        _ => (clean(chunk.first_line()), chunk.body()),
    };
    let body_text = body
        .iter()
        .map(|l| strip_list_marker(l.trim()))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let (category, lead) = if let Some((label, rest)) = heading.split_once(':') {
        (label.trim().to_string(), rest.trim().to_string())
    } else if let Some((label, rest)) = heading.split_once(" - ") {
        (label.trim().to_string(), rest.trim().to_string())
    } else {
        (heading.trim().to_string(), String::new())
    };

    let remainder = match (lead.is_empty(), body_text.is_empty()) {
        (true, _) => body_text,
        (false, true) => lead,
        (false, false) => format!("{lead} {body_text}"),
    };
    let (suggestion, rationale) = split_dash(&remainder);
    if suggestion.is_empty() {
        return None;
    }

    Some(Suggestion {
        category: if category.is_empty() {
            "general".to_string()
        } else {
            category
        },
        suggestion,
        rationale,
    })
}

fn split_dash(text: &str) -> (String, String) {
    let split = text
        .split_once(" - ")
        .or_else(|| text.split_once(" — "))
        .or_else(|| text.split_once(" – "));
    match split {
        Some((head, tail)) => (head.trim().to_string(), tail.trim().to_string()),
        None => (text.trim().to_string(), String::new()),
    }
}

/// Bullet lines of a heading section, or the whole item for a numbered one.
fn extract_notes(chunk: &Chunk<'_>) -> Vec<String> {
    match chunk.boundary {
        Boundary::Numbered => {
            let note = chunk
                .lines
                .iter()
                .map(|l| strip_list_marker(l.trim()))
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            vec![note]
        }
        _ => chunk
            .body()
            .iter()
            .map(|l| l.trim())
            .filter(|l| is_list_item(l))
            .map(|l| strip_list_marker(l).to_string())
            .collect(),
    }
}

/// Parse a model's code review into structured findings.
pub fn parse_improvement(text: &str) -> ParsedImprovement {
    let mut result = ParsedImprovement::default();
    let mut state: Option<Kind> = None;

    for chunk in split_sections(text) {
        let kind = match chunk.boundary {
            Boundary::Heading => {
                state = Kind::classify(&chunk.first_line().to_lowercase())
                    .or_else(|| Kind::classify(&chunk.text().to_lowercase()));
                state
            }
            Boundary::Numbered => state.or_else(|| Kind::classify(&chunk.text().to_lowercase())),
            Boundary::Preamble => Kind::classify(&chunk.text().to_lowercase()),
        };

        match kind {
            Some(Kind::Issue) => result.issues.extend(extract_issues(&chunk)),
            Some(Kind::Suggestion) => result.suggestions.extend(extract_suggestion(&chunk)),
            Some(Kind::Code) => {
                if result.refactored_code.is_none() {
                    result.refactored_code =
                        extract_code_block(&chunk.text()).map(|(_, code)| code);
                }
            }
            Some(Kind::Performance) => result.performance_notes.extend(extract_notes(&chunk)),
            Some(Kind::Security) => result.security_notes.extend(extract_notes(&chunk)),
            None => {}
        }
    }

    if result.issues.is_empty() && result.suggestions.is_empty() {
        result.suggestions.push(Suggestion {
            category: "general".to_string(),
            suggestion: "Review the full analysis".to_string(),
            rationale: text.to_string(),
        });
    }
    result
}
