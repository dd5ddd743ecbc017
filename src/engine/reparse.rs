use tracing::{debug, warn};

use crate::llm::{GenerationRequest, TextGeneration};

use super::extract::{self, ExtractStrategy};
use super::normalize;
use super::sanitize::TextSanitizer;
use super::{Confidence, GradingRecord, Provenance};

const REPARSE_SYSTEM_PROMPT: &str = "You convert grading feedback into JSON. \
Respond with a single JSON object and nothing else. Use the keys \"grade\", \
\"detailed_feedback\", \"student_feedback\", \"strengths\", \"weaknesses\", \
\"deductions\" and \"confidence\". Do not invent content that is not present \
in the input.";

const REPARSE_TEMPERATURE: f32 = 0.1;

/// Ask the model to restate its own earlier output as a structured object.
/// Only the fenced and balanced-brace strategies run on the reply; a reply
/// that needs greedy extraction or scraping is treated as a failure rather
/// than recovered further.
pub(crate) async fn reparse(
    port: &dyn TextGeneration,
    original_output: &str,
    sanitizer: &TextSanitizer,
) -> GradingRecord {
    let user_prompt = format!(
        "Restate the following grading response as a JSON object:\n\n{original_output}"
    );
    let request = GenerationRequest::new(REPARSE_SYSTEM_PROMPT, user_prompt)
        .with_temperature(REPARSE_TEMPERATURE);

    let reply = match port.generate(request).await {
        Ok(generation) => generation.text,
        Err(error) => {
            warn!(%error, "assisted re-parse call failed");
            return failed_record(original_output);
        }
    };

    let strategies = [ExtractStrategy::Fenced, ExtractStrategy::BalancedBrace];
    match extract::extract_with(&reply, &strategies) {
        Some((payload, strategy)) => {
            debug!(?strategy, "assisted re-parse reply decoded");
            let mut record = normalize::normalize(&payload, strategy, sanitizer);
            record.provenance = Provenance::AssistedReparse;
            record
        }
        None => {
            warn!("assisted re-parse reply did not decode");
            failed_record(original_output)
        }
    }
}

/// Record for a re-parse that could not produce structured data. The original
/// output is kept verbatim so a human can still read what the model said.
pub(crate) fn failed_record(original_output: &str) -> GradingRecord {
    GradingRecord {
        grade: GradingRecord::UNGRADED.to_string(),
        detailed_feedback: original_output.to_string(),
        confidence: Confidence::Low,
        provenance: Provenance::Failed,
        ..GradingRecord::default()
    }
}
