//! The grading engine: turns raw model output into one canonical
//! [`GradingRecord`] through an ordered ladder of recovery strategies, and
//! tags every record with the strategy that produced it.

pub mod extract;
mod fallback;
mod normalize;
mod reparse;
pub mod sanitize;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EngineSettings;
use crate::llm::{GenerationError, GenerationRequest, TextGeneration, TokenUsage};

use sanitize::TextSanitizer;

/// How confident the pipeline is in a record. Mirrors what the model reports
/// for structured output; fallback paths assign their own level.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub(crate) fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Which strategy produced a record. Listed in priority order; `assemble`
/// always reports the highest strategy that succeeded. The last two are only
/// reachable through [`GradingEngine::assisted_reparse`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    Structured,
    BalancedBrace,
    Greedy,
    FieldScrape,
    NaturalLanguage,
    AssistedReparse,
    Failed,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::BalancedBrace => "balanced-brace",
            Self::Greedy => "greedy",
            Self::FieldScrape => "field-scrape",
            Self::NaturalLanguage => "natural-language",
            Self::AssistedReparse => "assisted-reparse",
            Self::Failed => "failed",
        }
    }

    /// True for records a caller may want to re-parse or review by hand.
    pub fn is_low_quality(self) -> bool {
        matches!(self, Self::FieldScrape | Self::NaturalLanguage | Self::Failed)
    }
}

/// One point deduction with its reason.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Deduction {
    pub reason: String,
    #[serde(default)]
    pub points: f64,
}

/// The canonical output of the engine. Field names map 1:1 onto a persisted
/// grading-history row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GradingRecord {
    pub grade: String,
    pub detailed_feedback: String,
    pub student_feedback: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub deductions: Vec<Deduction>,
    pub ai_keywords_found: Vec<String>,
    pub confidence: Confidence,
    pub provenance: Provenance,
}

impl GradingRecord {
    /// Sentinel grade for output where no grade-shaped token was found.
    pub const UNGRADED: &'static str = "N/A";

    pub fn is_graded(&self) -> bool {
        self.grade != Self::UNGRADED
    }
}

impl Default for GradingRecord {
    fn default() -> Self {
        Self {
            grade: Self::UNGRADED.to_string(),
            detailed_feedback: String::new(),
            student_feedback: String::new(),
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            deductions: Vec::new(),
            ai_keywords_found: Vec::new(),
            confidence: Confidence::Low,
            provenance: Provenance::Failed,
        }
    }
}

/// A graded submission together with the raw output it was derived from and
/// the usage accounting of the underlying call.
#[derive(Clone, Debug)]
pub struct GradingOutcome {
    pub record: GradingRecord,
    pub raw_output: String,
    pub model: String,
    pub token_usage: TokenUsage,
}

/// Orchestrates the recovery ladder. Stateless per call; one instance can be
/// shared across concurrent gradings.
pub struct GradingEngine {
    sanitizer: TextSanitizer,
    student_preview_chars: usize,
}

impl GradingEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            sanitizer: TextSanitizer::new(&settings.sanitizer),
            student_preview_chars: settings.student_preview_chars,
        }
    }

    /// Convert raw model output into a record. Never fails: the worst case is
    /// an ungraded natural-language record carrying the raw text.
    pub fn assemble(&self, raw_text: &str) -> GradingRecord {
        if let Some((payload, strategy)) = extract::extract(raw_text) {
            debug!(?strategy, "structured payload decoded");
            return normalize::normalize(&payload, strategy, &self.sanitizer);
        }

        if let Some(record) = fallback::scrape_fields(raw_text) {
            debug!("recovered fields by scraping undecodable output");
            return self.scrub_fallback(record);
        }

        debug!("no structured payload found, using natural-language parse");
        let record = fallback::parse_natural_language(raw_text, self.student_preview_chars);
        self.scrub_fallback(record)
    }

    /// Send a prepared request through the port and assemble its reply.
    /// Transport failures are terminal here; parseability problems are not.
    pub async fn grade_submission(
        &self,
        port: &dyn TextGeneration,
        request: GenerationRequest,
    ) -> Result<GradingOutcome, GenerationError> {
        let generation = port.generate(request).await?;
        let record = self.assemble(&generation.text);
        Ok(GradingOutcome {
            record,
            raw_output: generation.text,
            model: generation.model,
            token_usage: generation.token_usage,
        })
    }

    /// Explicit last resort for low-quality outcomes: ask the model to
    /// restate its own output as structured data. Never invoked by
    /// [`Self::assemble`] on its own.
    pub async fn assisted_reparse(
        &self,
        port: &dyn TextGeneration,
        original_output: &str,
    ) -> GradingRecord {
        reparse::reparse(port, original_output, &self.sanitizer).await
    }

    /// The leak guard and sanitizer run on every path out of `assemble`, not
    /// just the structured one.
    fn scrub_fallback(&self, mut record: GradingRecord) -> GradingRecord {
        record.detailed_feedback =
            normalize::scrub_feedback(&record.detailed_feedback, &self.sanitizer, "detailed_feedback");
        record.student_feedback =
            normalize::scrub_feedback(&record.student_feedback, &self.sanitizer, "student_feedback");
        record
    }
}

impl Default for GradingEngine {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

/// Human-readable rendering of a record, for terminal display or plain-text
/// export. Empty sections are omitted.
pub fn format_record(record: &GradingRecord) -> String {
    let mut out = format!("Grade: {}\n", record.grade);

    if !record.detailed_feedback.is_empty() {
        out.push_str("\nDetailed Feedback:\n");
        out.push_str(&record.detailed_feedback);
        out.push('\n');
    }

    if !record.strengths.is_empty() {
        out.push_str("\nStrengths:\n");
        for item in &record.strengths {
            out.push_str(&format!("- {item}\n"));
        }
    }

    if !record.weaknesses.is_empty() {
        out.push_str("\nWeaknesses:\n");
        for item in &record.weaknesses {
            out.push_str(&format!("- {item}\n"));
        }
    }

    if !record.deductions.is_empty() {
        out.push_str("\nDeductions:\n");
        for deduction in &record.deductions {
            out.push_str(&format!("- {} (-{} points)\n", deduction.reason, deduction.points));
        }
    }

    if !record.student_feedback.is_empty() {
        out.push_str("\nStudent Feedback:\n");
        out.push_str(&record.student_feedback);
        out.push('\n');
    }

    out
}
