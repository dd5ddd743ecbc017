use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

/// The ordered strategies for locating one JSON object inside raw model
/// output. Listed in priority order; `extract` attempts each in turn.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExtractStrategy {
    /// A fenced code block, optionally tagged `json`.
    Fenced,
    /// Forward scan from the first opening brace, with quoted strings
    /// treated as opaque.
    BalancedBrace,
    /// The span from the first opening brace to the last closing brace.
    Greedy,
}

const ALL_STRATEGIES: &[ExtractStrategy] = &[
    ExtractStrategy::Fenced,
    ExtractStrategy::BalancedBrace,
    ExtractStrategy::Greedy,
];

/// Attempt to decode one JSON object from raw model output. Returns the
/// decoded payload and the strategy that produced it, or `None` when every
/// strategy fails. Decode failures are never fatal; they fall through to
/// the next strategy.
pub fn extract(raw_text: &str) -> Option<(Map<String, Value>, ExtractStrategy)> {
    extract_with(raw_text, ALL_STRATEGIES)
}

/// Run only the given strategies, in the given order. The assisted re-parse
/// path restricts itself to the first two.
pub fn extract_with(
    raw_text: &str,
    strategies: &[ExtractStrategy],
) -> Option<(Map<String, Value>, ExtractStrategy)> {
    if raw_text.trim().is_empty() {
        return None;
    }

    for &strategy in strategies {
        let candidate = match strategy {
            ExtractStrategy::Fenced => fenced_span(raw_text),
            ExtractStrategy::BalancedBrace => balanced_object_span(raw_text),
            ExtractStrategy::Greedy => greedy_span(raw_text),
        };

        let Some(candidate) = candidate else {
            continue;
        };

        match decode_object(candidate) {
            Some(payload) => return Some((payload, strategy)),
            None => debug!(?strategy, "candidate span did not decode, falling through"),
        }
    }

    None
}

/// Contents of the first fenced code block that holds a brace-delimited
/// span. Later blocks are ignored.
fn fenced_span(text: &str) -> Option<&str> {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fence pattern"));

    fence.captures(text).map(|captures| {
        captures
            .get(1)
            .expect("fence pattern has one capture group")
            .as_str()
    })
}

/// Span from the first `{` to its matching `}` at depth zero. Braces inside
/// quoted strings do not perturb the depth count, escaped quotes do not
/// terminate a string early, and escaped backslashes do not swallow the
/// character after them.
fn balanced_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in text.as_bytes()[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// First `{` to the last `}` in the text.
fn greedy_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn decode_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}
