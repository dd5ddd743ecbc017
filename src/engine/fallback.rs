use std::sync::OnceLock;

use regex::Regex;

use super::{Confidence, GradingRecord, Provenance};

fn pattern(cell: &'static OnceLock<Regex>, source: &'static str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(source).expect("hard-coded fallback pattern"))
}

/// Scrape individual fields out of text that looks like JSON but would not
/// decode, e.g. when one malformed value breaks the whole object. Returns a
/// record only when at least a grade was recovered.
pub(crate) fn scrape_fields(raw_text: &str) -> Option<GradingRecord> {
    static GRADE_QUOTED: OnceLock<Regex> = OnceLock::new();
    static GRADE_BARE: OnceLock<Regex> = OnceLock::new();
    static DETAILED: OnceLock<Regex> = OnceLock::new();
    static STUDENT: OnceLock<Regex> = OnceLock::new();

    let grade = pattern(&GRADE_QUOTED, r#""grade"\s*:\s*"([^"]+)""#)
        .captures(raw_text)
        .or_else(|| pattern(&GRADE_BARE, r#""grade"\s*:\s*(\d+(?:\.\d+)?)"#).captures(raw_text))
        .map(|captures| captures[1].trim().to_string())?;

    let detailed = pattern(&DETAILED, r#""detailed_feedback"\s*:\s*"((?:[^"\\]|\\.)*)""#)
        .captures(raw_text)
        .map(|captures| unescape_json_fragment(&captures[1]))
        .unwrap_or_default();

    let student = pattern(&STUDENT, r#""student_feedback"\s*:\s*"((?:[^"\\]|\\.)*)""#)
        .captures(raw_text)
        .map(|captures| unescape_json_fragment(&captures[1]))
        .unwrap_or_default();

    Some(GradingRecord {
        grade,
        detailed_feedback: detailed,
        student_feedback: student,
        confidence: Confidence::Low,
        provenance: Provenance::FieldScrape,
        ..GradingRecord::default()
    })
}

/// Resolve the escape sequences that matter inside a scraped string value.
fn unescape_json_fragment(fragment: &str) -> String {
    fragment
        .replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("\\\"", "\"")
        .replace("\\\\", "\\")
        .trim()
        .to_string()
}

/// Heuristic parse of prose output. Always succeeds: worst case the record
/// carries the raw text as detailed feedback and an ungraded sentinel.
pub(crate) fn parse_natural_language(raw_text: &str, student_preview_chars: usize) -> GradingRecord {
    static GRADE_LABEL: OnceLock<Regex> = OnceLock::new();
    static SCORE_LABEL: OnceLock<Regex> = OnceLock::new();
    static LEADING_GRADE: OnceLock<Regex> = OnceLock::new();
    static STRENGTHS: OnceLock<Regex> = OnceLock::new();
    static WEAKNESSES: OnceLock<Regex> = OnceLock::new();

    let grade = pattern(&GRADE_LABEL, r"(?i)grade:\s*([A-E][+-]?|\d+(?:\.\d+)?)")
        .captures(raw_text)
        .or_else(|| {
            pattern(&SCORE_LABEL, r"(?i)score:\s*(\d+(?:\.\d+)?)").captures(raw_text)
        })
        .or_else(|| {
            // A lone letter grade standing on the first line. Anchoring to
            // the line end keeps ordinary prose ("Based on...") from being
            // misread as a grade.
            pattern(&LEADING_GRADE, r"\A([A-E][+-]?)[ \t]*(?:\r?\n|\z)").captures(raw_text)
        })
        .map(|captures| captures[1].to_string())
        .unwrap_or_else(|| GradingRecord::UNGRADED.to_string());

    let strengths = pattern(
        &STRENGTHS,
        r"(?is)strengths?:?\s*(.*?)(?:weaknesses?|deductions?|feedback|$)",
    )
    .captures(raw_text)
    .map(|captures| bullet_items(&captures[1]))
    .unwrap_or_default();

    let weaknesses = pattern(
        &WEAKNESSES,
        r"(?is)weaknesses?:?\s*(.*?)(?:strengths?|deductions?|feedback|$)",
    )
    .captures(raw_text)
    .map(|captures| bullet_items(&captures[1]))
    .unwrap_or_default();

    GradingRecord {
        grade,
        detailed_feedback: raw_text.to_string(),
        student_feedback: preview(raw_text, student_preview_chars),
        strengths,
        weaknesses,
        confidence: Confidence::Medium,
        provenance: Provenance::NaturalLanguage,
        ..GradingRecord::default()
    }
}

fn bullet_items(section: &str) -> Vec<String> {
    static BULLET: OnceLock<Regex> = OnceLock::new();
    pattern(&BULLET, r"(?m)^\s*[-•*]\s*(.+)$")
        .captures_iter(section)
        .map(|captures| captures[1].trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Character-based truncation; not word-boundary aware, but always a valid
/// UTF-8 prefix.
pub(crate) fn preview(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        text.chars().take(limit).collect()
    } else {
        text.to_string()
    }
}
