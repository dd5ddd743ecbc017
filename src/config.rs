use std::{env, time::Duration};

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// How many characters of raw text are kept as the student-facing preview
/// when no structured student feedback could be recovered.
pub const DEFAULT_STUDENT_PREVIEW_CHARS: usize = 500;

/// Connection settings for the local generation service.
#[derive(Clone, Debug)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl LlmSettings {
    /// Build settings from environment variables, falling back to local
    /// defaults. Reads `.env` first so deployments can keep the host and
    /// model out of the shell environment.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let base_url =
            env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_OLLAMA_HOST.to_string());
        let model = env::var("GRADEKIT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let timeout = env::var("GRADEKIT_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));

        Self {
            base_url,
            model,
            timeout,
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_HOST.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Catalogue of text-cleaning rules applied to feedback fields. The phrase
/// list is deliberately open: the defaults cover the praise phrases the
/// grading prompt forbids, and deployments can extend or replace them.
#[derive(Clone, Debug)]
pub struct SanitizerSettings {
    pub generic_phrases: Vec<String>,
}

impl SanitizerSettings {
    pub fn with_phrases(generic_phrases: Vec<String>) -> Self {
        Self { generic_phrases }
    }
}

impl Default for SanitizerSettings {
    fn default() -> Self {
        Self {
            generic_phrases: default_generic_phrases(),
        }
    }
}

pub fn default_generic_phrases() -> Vec<String> {
    [
        "Keep up the good work",
        "Keep up the great work",
        "Well done",
        "Good job",
        "Great job",
        "Great work",
        "Nice work",
        "Excellent work",
        "Keep it up",
        "Continue the good work",
        "You're doing great",
        "You did great",
    ]
    .iter()
    .map(|phrase| phrase.to_string())
    .collect()
}

/// Settings for the record assembler.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub sanitizer: SanitizerSettings,
    pub student_preview_chars: usize,
}

impl EngineSettings {
    pub fn new(sanitizer: SanitizerSettings) -> Self {
        Self {
            sanitizer,
            student_preview_chars: DEFAULT_STUDENT_PREVIEW_CHARS,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::new(SanitizerSettings::default())
    }
}
