//! Grading-assistant core: sends student submissions to a local language
//! model and turns the model's free-form reply into structured grading data.
//!
//! The centerpiece is the recovery ladder in [`engine`]: structured parse,
//! balanced-brace extraction, greedy extraction, field scraping, and a
//! natural-language heuristic, with an explicit model-assisted re-parse as a
//! caller-invoked last resort. Every record carries the provenance of the
//! strategy that produced it.

pub mod batch;
pub mod config;
pub mod detector;
pub mod engine;
pub mod llm;

pub use batch::{BatchSummary, GradingJob, GradingJobResult, grade_batch, summarize};
pub use config::{EngineSettings, LlmSettings, SanitizerSettings};
pub use detector::{DisclosureAnalysis, DisclosureError, analyze_disclosure, detect_keywords};
pub use engine::{
    Confidence, Deduction, GradingEngine, GradingOutcome, GradingRecord, Provenance, format_record,
};
pub use llm::{
    Generation, GenerationError, GenerationRequest, OllamaClient, TextGeneration, TokenUsage,
};
