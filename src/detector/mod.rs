//! Marker detection on submission text. The regex half is exact and cheap;
//! the model-backed half reads a submission's own wording to judge whether
//! the student disclosed tool assistance.

use regex::RegexBuilder;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::engine::extract::{self, ExtractStrategy};
use crate::llm::{GenerationError, GenerationRequest, TextGeneration};

/// Case-insensitive whole-word search of `text` for each comma-separated
/// keyword. Matched keywords come back in input order. A hyphen joins words:
/// `chatgpt` does not match inside `ChatGPT-5`.
pub fn detect_keywords(text: &str, keywords_csv: &str) -> Vec<String> {
    keywords_csv
        .split(',')
        .map(str::trim)
        .filter(|keyword| !keyword.is_empty())
        .filter(|keyword| {
            let pattern = format!(r"(?:^|[^\w-]){}(?:$|[^\w-])", regex::escape(keyword));
            match RegexBuilder::new(&pattern).case_insensitive(true).build() {
                Ok(regex) => regex.is_match(text),
                Err(error) => {
                    warn!(keyword, %error, "skipping unusable keyword");
                    false
                }
            }
        })
        .map(str::to_string)
        .collect()
}

/// Model judgment on whether a submission openly discloses tool assistance.
#[derive(Clone, Debug)]
pub struct DisclosureAnalysis {
    pub disclosed: bool,
    pub explanation: String,
}

#[derive(Debug, Error)]
pub enum DisclosureError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("disclosure reply could not be decoded: {reply}")]
    Unparseable { reply: String },
}

const DISCLOSURE_SYSTEM_PROMPT: &str = "You review student submissions for \
explicit statements that the student used AI assistance. Respond with a \
single JSON object: {\"disclosed\": true or false, \"explanation\": \"one \
sentence quoting or summarizing the relevant statement, or noting that none \
exists\"}.";

/// Ask the model whether the submission discloses AI assistance. Only the
/// fenced and balanced-brace strategies run on the reply; anything less
/// structured is an error the caller should see.
pub async fn analyze_disclosure(
    port: &dyn TextGeneration,
    submission: &str,
) -> Result<DisclosureAnalysis, DisclosureError> {
    let request = GenerationRequest::new(
        DISCLOSURE_SYSTEM_PROMPT,
        format!("Submission:\n\n{submission}"),
    )
    .with_temperature(0.1);

    let generation = port.generate(request).await?;

    let strategies = [ExtractStrategy::Fenced, ExtractStrategy::BalancedBrace];
    let Some((payload, strategy)) = extract::extract_with(&generation.text, &strategies) else {
        return Err(DisclosureError::Unparseable {
            reply: generation.text,
        });
    };
    debug!(?strategy, "disclosure reply decoded");

    let disclosed = payload
        .get("disclosed")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let explanation = payload
        .get("explanation")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(DisclosureAnalysis {
        disclosed,
        explanation,
    })
}
