//! Structured-result extraction from free-text agent messages
//!
//! The remote agent returns loosely structured text. Callers supply a
//! fallback object; parse failures never propagate as errors but the outcome
//! is tagged so degraded results stay distinguishable downstream.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use triage_core::StageResult;

static FENCED_BLOCK: OnceLock<Regex> = OnceLock::new();

fn fenced_block() -> &'static Regex {
    FENCED_BLOCK.get_or_init(|| {
        // Non-greedy so multiple blocks are tried individually
        Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("static regex")
    })
}

/// Outcome of extracting a structured result from agent text
#[derive(Debug, Clone)]
pub enum ParseOutcome {
    /// The message contained a parseable JSON object
    Parsed(Value),
    /// Extraction failed; the caller-supplied fallback is used instead
    Degraded { fallback: Value, raw: String },
}

impl ParseOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, ParseOutcome::Degraded { .. })
    }

    pub fn value(&self) -> &Value {
        match self {
            ParseOutcome::Parsed(value) => value,
            ParseOutcome::Degraded { fallback, .. } => fallback,
        }
    }

    /// Convert into a [`StageResult`] carrying the degraded flag
    pub fn into_stage_result(self) -> StageResult {
        match self {
            ParseOutcome::Parsed(value) => StageResult::parsed(value),
            ParseOutcome::Degraded { fallback, .. } => StageResult::degraded(fallback),
        }
    }
}

/// Extract a JSON object from agent text, falling back on failure
///
/// Tries fenced code blocks first, then bare objects embedded in prose.
pub fn parse_structured(text: &str, fallback: Value) -> ParseOutcome {
    if let Some(value) = extract_json(text) {
        return ParseOutcome::Parsed(value);
    }

    tracing::debug!(
        chars = text.len(),
        "No structured object found in agent text, using fallback"
    );

    ParseOutcome::Degraded {
        fallback,
        raw: text.to_string(),
    }
}

fn extract_json(text: &str) -> Option<Value> {
    // Fenced code blocks, in order of appearance
    for captures in fenced_block().captures_iter(text) {
        if let Some(block) = captures.get(1) {
            if let Ok(value) = serde_json::from_str::<Value>(block.as_str()) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
    }

    // Bare object embedded in prose: try each balanced {...} span
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        if let Some(close) = balanced_end(bytes, open) {
            if let Ok(value) = serde_json::from_str::<Value>(&text[open..=close]) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
        start = open + 1;
    }

    None
}

/// Index of the brace closing the object opened at `open`, string-aware
fn balanced_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}
