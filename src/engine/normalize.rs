use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::extract::ExtractStrategy;
use super::sanitize::TextSanitizer;
use super::{Confidence, Deduction, GradingRecord, Provenance};

const ALTERNATE_GRADE_KEYS: &[&str] = &["score", "final_grade", "grade_value"];

/// Turn a decoded payload into a best-effort record. Never fails: missing or
/// ill-typed fields normalize to their empty forms, and the grade falls back
/// through alternate keys before settling on the ungraded sentinel.
pub(crate) fn normalize(
    payload: &Map<String, Value>,
    strategy: ExtractStrategy,
    sanitizer: &TextSanitizer,
) -> GradingRecord {
    let mut detailed = string_field(payload, "detailed_feedback");
    let mut student = string_field(payload, "student_feedback");

    // Models sometimes fold the student-facing section into the instructor
    // feedback instead of filling its own field. Pull it back out so the two
    // fields never overlap.
    if student.trim().is_empty() && !detailed.trim().is_empty() {
        if let Some((remainder, section)) = split_student_section(&detailed) {
            debug!(
                chars = section.len(),
                "recovered student feedback embedded in detailed feedback"
            );
            detailed = remainder;
            student = section;
        }
    }

    let detailed = scrub_feedback(&detailed, sanitizer, "detailed_feedback");
    let student = scrub_feedback(&student, sanitizer, "student_feedback");

    let grade = coerce_grade(payload.get("grade"))
        .or_else(|| {
            ALTERNATE_GRADE_KEYS.iter().find_map(|key| {
                let grade = coerce_grade(payload.get(*key))?;
                debug!(key, grade = %grade, "grade found under alternate key");
                Some(grade)
            })
        })
        .unwrap_or_else(|| GradingRecord::UNGRADED.to_string());

    GradingRecord {
        grade,
        detailed_feedback: detailed,
        student_feedback: student,
        strengths: string_list(payload.get("strengths")),
        weaknesses: string_list(payload.get("weaknesses")),
        deductions: deduction_list(payload.get("deductions")),
        ai_keywords_found: string_list(
            payload
                .get("ai_detection_keywords")
                .or_else(|| payload.get("ai_keywords_found")),
        ),
        confidence: confidence_field(payload.get("confidence")),
        provenance: provenance_for(strategy),
    }
}

pub(crate) fn provenance_for(strategy: ExtractStrategy) -> Provenance {
    match strategy {
        ExtractStrategy::Fenced => Provenance::Structured,
        ExtractStrategy::BalancedBrace => Provenance::BalancedBrace,
        ExtractStrategy::Greedy => Provenance::Greedy,
    }
}

/// Leak guard plus both sanitizer passes. A feedback field that still holds
/// a serialized payload is discarded rather than surfaced as prose.
pub(crate) fn scrub_feedback(text: &str, sanitizer: &TextSanitizer, field: &str) -> String {
    if text.trim().is_empty() {
        return String::new();
    }
    if looks_like_serialized_payload(text) {
        warn!(field, "feedback field contained a serialized payload, discarding");
        return String::new();
    }
    sanitizer.clean(text)
}

pub(crate) fn looks_like_serialized_payload(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with('{') && trimmed.contains("\"grade\"")
}

/// Locate a labeled student-feedback sub-section inside detailed feedback.
/// Returns the detailed text truncated at the heading plus the section body.
fn split_student_section(detailed: &str) -> Option<(String, String)> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            r"(?is)student feedback:\s*\n\n(.+?)(?:\n\n[A-Z]|$)",
            r"(?is)student feedback:\s*(.+?)(?:\n\n|$)",
            r"(?is)feedback for student:\s*\n*(.+?)(?:\n\n|$)",
            r"(?is)for student:\s*\n*(.+?)(?:\n\n|$)",
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("hard-coded heading pattern"))
        .collect()
    });

    for pattern in patterns {
        let Some(captures) = pattern.captures(detailed) else {
            continue;
        };
        let section = captures
            .get(1)
            .expect("heading pattern has one capture group")
            .as_str()
            .trim();
        if section.is_empty() {
            continue;
        }
        let heading_start = captures.get(0).expect("whole match").start();
        let remainder = detailed[..heading_start].trim_end().to_string();
        return Some((remainder, section.to_string()));
    }

    None
}

/// Grades arrive as strings or numbers; anything else is unusable and falls
/// through to the alternate keys.
fn coerce_grade(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(number) => number
            .as_i64()
            .map(|whole| whole.to_string())
            .or_else(|| number.as_f64().map(|real| (real as i64).to_string())),
        _ => None,
    }
}

fn string_field(payload: &Map<String, Value>, key: &str) -> String {
    payload
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn deduction_list(value: Option<&Value>) -> Vec<Deduction> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect(),
        _ => Vec::new(),
    }
}

fn confidence_field(value: Option<&Value>) -> Confidence {
    value
        .and_then(Value::as_str)
        .and_then(Confidence::parse)
        .unwrap_or(Confidence::Medium)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload_from(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn run(value: Value) -> GradingRecord {
        normalize(
            &payload_from(value),
            ExtractStrategy::BalancedBrace,
            &TextSanitizer::default(),
        )
    }

    #[test]
    fn numeric_grade_becomes_integer_string() {
        let record = run(json!({ "grade": 16 }));
        assert_eq!(record.grade, "16");

        let record = run(json!({ "grade": 87.6 }));
        assert_eq!(record.grade, "87");
    }

    #[test]
    fn null_grade_falls_back_to_alternate_keys() {
        let record = run(json!({ "grade": null, "score": 85 }));
        assert_eq!(record.grade, "85");

        let record = run(json!({ "grade": "  ", "final_grade": "B+" }));
        assert_eq!(record.grade, "B+");
    }

    #[test]
    fn missing_grade_settles_on_sentinel() {
        let record = run(json!({ "detailed_feedback": "No grade anywhere." }));
        assert_eq!(record.grade, GradingRecord::UNGRADED);
    }

    #[test]
    fn student_section_is_pulled_out_of_detailed_feedback() {
        let record = run(json!({
            "grade": "A-",
            "detailed_feedback":
                "The argument is coherent throughout.\n\nStudent Feedback:\n\nNice use of examples.",
        }));
        assert_eq!(record.student_feedback, "Nice use of examples.");
        assert!(!record.detailed_feedback.contains("Nice use of examples."));
        assert!(!record.detailed_feedback.to_lowercase().contains("student feedback"));
    }

    #[test]
    fn inline_student_heading_is_also_recognized() {
        let record = run(json!({
            "grade": "B",
            "detailed_feedback": "Solid structure overall.\n\nStudent Feedback: Cite your sources next time.",
        }));
        assert_eq!(record.student_feedback, "Cite your sources next time.");
        assert_eq!(record.detailed_feedback, "Solid structure overall.");
    }

    #[test]
    fn populated_student_feedback_is_left_alone() {
        let record = run(json!({
            "grade": "C",
            "detailed_feedback": "Student Feedback: this stays put.",
            "student_feedback": "Already present.",
        }));
        assert_eq!(record.student_feedback, "Already present.");
        assert!(record.detailed_feedback.contains("this stays put"));
    }

    #[test]
    fn contaminated_feedback_is_discarded() {
        let leaked = "{\"grade\": \"A\", \"detailed_feedback\": \"text\"}";
        let record = run(json!({ "grade": "A", "detailed_feedback": leaked }));
        assert_eq!(record.detailed_feedback, "");
    }

    #[test]
    fn lists_default_to_empty_when_ill_typed() {
        let record = run(json!({
            "grade": "B",
            "strengths": "not a list",
            "weaknesses": null,
            "deductions": 4,
        }));
        assert!(record.strengths.is_empty());
        assert!(record.weaknesses.is_empty());
        assert!(record.deductions.is_empty());
    }

    #[test]
    fn deductions_keep_reason_and_points() {
        let record = run(json!({
            "grade": "14",
            "deductions": [
                { "reason": "missing citations", "points": 2 },
                { "reason": "late submission", "points": 1.5 },
                "not a deduction",
            ],
        }));
        assert_eq!(record.deductions.len(), 2);
        assert_eq!(record.deductions[0].reason, "missing citations");
        assert!((record.deductions[1].points - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn model_flagged_keywords_are_read_from_either_key() {
        let record = run(json!({ "grade": "A", "ai_detection_keywords": ["as an AI"] }));
        assert_eq!(record.ai_keywords_found, vec!["as an AI"]);

        let record = run(json!({ "grade": "A", "ai_keywords_found": ["chatgpt"] }));
        assert_eq!(record.ai_keywords_found, vec!["chatgpt"]);
    }

    #[test]
    fn unknown_confidence_defaults_to_medium() {
        let record = run(json!({ "grade": "A", "confidence": "certain" }));
        assert_eq!(record.confidence, Confidence::Medium);

        let record = run(json!({ "grade": "A", "confidence": "HIGH" }));
        assert_eq!(record.confidence, Confidence::High);
    }

    #[test]
    fn feedback_fields_are_sanitized() {
        let record = run(json!({
            "grade": "A",
            "detailed_feedback": "Good job! The analysis was solid.\n\nAI Detection Keywords: []",
        }));
        assert_eq!(record.detailed_feedback, "The analysis was solid.");
    }
}
