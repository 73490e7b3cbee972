//! Operation schemas, prompt templates and result types.
//!
//! Each operation (generate, explain, improve) has a request type that is
//! deserialized leniently and then validated field by field, a pair of
//! prompt builders, and a result type. Results carry `usage`, `cost` and a
//! `cached` flag next to the operation-specific payload.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::FieldError;
use crate::parser::{ParsedExplanation, ParsedImprovement, extract_code_block, is_fence};
use crate::types::{Message, Usage};
use crate::{MimirError, Result};

/// Upper bound on code submitted to explain/improve, in characters.
pub const MAX_CODE_CHARS: usize = 50_000;
/// Upper bound on a generate description, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 5_000;
/// Upper bound on free-text context and requirements, in characters.
pub const MAX_CONTEXT_CHARS: usize = 10_000;

/// Language reported when detection finds nothing.
pub const UNKNOWN_LANGUAGE: &str = "text";

/// Operation names, used for cache keys and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Generate,
    Explain,
    Improve,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Generate => "generate",
            Operation::Explain => "explain",
            Operation::Improve => "improve",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &Value) -> Result<T> {
    if !body.is_object() {
        return Err(MimirError::invalid("body", "must be a JSON object"));
    }
    Ok(serde_json::from_value(body.clone())?)
}

fn check_text(
    errors: &mut Vec<FieldError>,
    field: &str,
    value: &str,
    required: bool,
    max: usize,
) {
    if required && value.trim().is_empty() {
        errors.push(FieldError::new(field, "is required"));
    } else if value.chars().count() > max {
        errors.push(FieldError::new(
            field,
            format!("must be at most {max} characters"),
        ));
    }
}

fn finish(errors: Vec<FieldError>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(MimirError::Validation(errors))
    }
}

/// Request to generate code from a description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateRequest {
    pub description: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl GenerateRequest {
    /// Deserialize and validate a request body.
    pub fn from_body(body: &Value) -> Result<Self> {
        let request: Self = parse_body(body)?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        check_text(
            &mut errors,
            "description",
            &self.description,
            true,
            MAX_DESCRIPTION_CHARS,
        );
        check_text(&mut errors, "language", &self.language, true, 50);
        if let Some(ref context) = self.context {
            check_text(&mut errors, "context", context, false, MAX_CONTEXT_CHARS);
        }
        finish(errors)
    }

    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// Parameters that determine the result.
    pub fn cache_params(&self) -> Value {
        json!({
            "description": self.description,
            "language": self.language,
            "context": self.context,
        })
    }

    pub fn messages(&self) -> Vec<Message> {
        let mut prompt = format!(
            "Write {} code for the following task.\n\nTask: {}",
            self.language, self.description
        );
        if let Some(ref context) = self.context {
            prompt.push_str("\n\nAdditional context:\n");
            prompt.push_str(context);
        }
        prompt.push_str(
            "\n\nReturn the complete code in a single fenced code block, \
             followed by a short explanation of how it works.",
        );
        vec![
            Message::system(format!(
                "You are an expert {} developer. Write clean, idiomatic, \
                 well-structured code with brief comments where they help.",
                self.language
            )),
            Message::user(prompt),
        ]
    }
}

/// Request to explain a piece of code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainRequest {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl ExplainRequest {
    pub fn from_body(body: &Value) -> Result<Self> {
        let request: Self = parse_body(body)?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        check_text(&mut errors, "code", &self.code, true, MAX_CODE_CHARS);
        finish(errors)
    }

    /// Given language, or the detected one.
    pub fn language(&self) -> String {
        resolve_language(self.language.as_deref(), &self.code)
    }

    pub fn cache_params(&self) -> Value {
        json!({ "code": self.code, "language": self.language() })
    }

    pub fn messages(&self) -> Vec<Message> {
        let language = self.language();
        vec![
            Message::system(
                "You are a patient programming teacher. Explain code clearly \
                 to a developer who is new to it.",
            ),
            Message::user(format!(
                "Explain the following {language} code.\n\n\
                 ```{language}\n{code}\n```\n\n\
                 Structure the answer with these headings:\n\
                 ## Overview\n\
                 ## Step-by-step breakdown\n\
                 ## Key concepts\n\
                 ## Use cases\n\
                 ## Considerations\n\
                 Use a numbered list for the steps and bullet lists elsewhere.",
                code = self.code
            )),
        ]
    }
}

/// Request to review and improve a piece of code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImproveRequest {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
}

impl ImproveRequest {
    pub fn from_body(body: &Value) -> Result<Self> {
        let request: Self = parse_body(body)?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        check_text(&mut errors, "code", &self.code, true, MAX_CODE_CHARS);
        if let Some(ref requirements) = self.requirements {
            check_text(
                &mut errors,
                "requirements",
                requirements,
                false,
                MAX_CONTEXT_CHARS,
            );
        }
        finish(errors)
    }

    pub fn language(&self) -> String {
        resolve_language(self.language.as_deref(), &self.code)
    }

    pub fn cache_params(&self) -> Value {
        json!({
            "code": self.code,
            "language": self.language(),
            "requirements": self.requirements,
        })
    }

    pub fn messages(&self) -> Vec<Message> {
        let language = self.language();
        let mut prompt = format!(
            "Review the following {language} code.\n\n```{language}\n{}\n```\n\n",
            self.code
        );
        if let Some(ref requirements) = self.requirements {
            prompt.push_str(&format!("Requirements to keep in mind: {requirements}\n\n"));
        }
        prompt.push_str(
            "Answer with these sections:\n\
             ## Issues\n\
             1. Type: description (mention severity: critical, high, medium or low)\n\
             ## Suggestions\n\
             1. Category: suggestion - rationale\n\
             ## Refactored code\n\
             A single fenced code block with the improved version.\n\
             ## Performance\n\
             - bullet notes\n\
             ## Security\n\
             - bullet notes",
        );
        vec![
            Message::system(
                "You are a senior engineer doing a careful code review. Be \
                 specific and actionable.",
            ),
            Message::user(prompt),
        ]
    }
}

fn resolve_language(given: Option<&str>, code: &str) -> String {
    match given.map(str::trim) {
        Some(lang) if !lang.is_empty() => lang.to_lowercase(),
        _ => detect_language(code).to_string(),
    }
}

/// Keyword signatures per language, checked in order. Earlier entries win ties.
const SIGNATURES: &[(&str, &[&str])] = &[
    (
        "rust",
        &["fn ", "let mut ", "impl ", "pub fn", "println!", "use std::", "-> Result<", "&mut self"],
    ),
    (
        "python",
        &["def ", "import ", "elif ", "self.", "print(", "__init__", "None:", "lambda "],
    ),
    (
        "go",
        &["package ", "func ", ":= ", "fmt.", "go func", "chan ", "err != nil"],
    ),
    (
        "java",
        &["public class", "public static void", "System.out", "private final", "@Override", "extends "],
    ),
    (
        "typescript",
        &["interface ", ": string", ": number", ": boolean", "export type", "as const", "<T>"],
    ),
    (
        "javascript",
        &["function ", "const ", "=> ", "console.log", "require(", "module.exports", "let "],
    ),
    (
        "cpp",
        &["#include <iostream>", "std::", "cout <<", "template<", "template <", "nullptr", "namespace "],
    ),
    ("c", &["#include <stdio.h>", "#include", "printf(", "malloc(", "int main("]),
    ("ruby", &["puts ", "end\n", "require '", "attr_accessor", "def self.", ".each do"]),
    ("php", &["<?php", "$this->", "echo ", "function __construct", "->"]),
    (
        "sql",
        &["SELECT ", "INSERT INTO", "CREATE TABLE", "UPDATE ", "WHERE ", "JOIN "],
    ),
];

/// Guess a language from keyword signatures.
///
/// Returns [`UNKNOWN_LANGUAGE`] when no signature matches.
pub fn detect_language(code: &str) -> &'static str {
    let mut best = (UNKNOWN_LANGUAGE, 0usize);
    for (language, keywords) in SIGNATURES {
        let score = keywords.iter().filter(|k| code.contains(**k)).count();
        if score > best.1 {
            best = (*language, score);
        }
    }
    best.0
}

/// Split generated text into the first fenced code block and the prose
/// around it. Without a fence, the whole text is code.
pub fn split_code_and_prose(text: &str) -> (String, String) {
    let Some((_, code)) = extract_code_block(text) else {
        return (text.trim().to_string(), String::new());
    };

    let mut prose = Vec::new();
    let mut fences_seen = 0;
    for line in text.lines() {
        if fences_seen < 2 && is_fence(line) {
            fences_seen += 1;
            continue;
        }
        if fences_seen == 1 {
            continue;
        }
        prose.push(line);
    }
    (code, prose.join("\n").trim().to_string())
}

/// A result that can be served from the response cache.
pub trait CachedResult: Serialize + serde::de::DeserializeOwned + Send {
    fn mark_cached(&mut self);
}

/// Result of `generate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResult {
    pub code: String,
    pub explanation: String,
    pub language: String,
    pub usage: Usage,
    pub cost: f64,
    pub cached: bool,
}

/// Result of `explain`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainResult {
    #[serde(flatten)]
    pub explanation: ParsedExplanation,
    pub language: String,
    pub usage: Usage,
    pub cost: f64,
    pub cached: bool,
}

/// Result of `improve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImproveResult {
    #[serde(flatten)]
    pub improvement: ParsedImprovement,
    pub language: String,
    pub usage: Usage,
    pub cost: f64,
    pub cached: bool,
}

impl CachedResult for GenerateResult {
    fn mark_cached(&mut self) {
        self.cached = true;
    }
}

impl CachedResult for ExplainResult {
    fn mark_cached(&mut self) {
        self.cached = true;
    }
}

impl CachedResult for ImproveResult {
    fn mark_cached(&mut self) {
        self.cached = true;
    }
}
