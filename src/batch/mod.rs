//! Concurrent grading of many submissions. Each job is independent; results
//! carry the job id so callers can reorder them however they like.

use std::collections::BTreeMap;

use futures::{StreamExt, stream};
use tracing::{debug, warn};

use crate::engine::{GradingEngine, GradingOutcome};
use crate::llm::{GenerationError, GenerationRequest, TextGeneration};

/// How many generations run at once by default. Local model servers queue
/// heavily beyond this.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// One submission to grade, with a caller-chosen identifier and a fully
/// prepared request.
#[derive(Debug, Clone)]
pub struct GradingJob {
    pub id: String,
    pub request: GenerationRequest,
}

impl GradingJob {
    pub fn new(id: impl Into<String>, request: GenerationRequest) -> Self {
        Self {
            id: id.into(),
            request,
        }
    }
}

/// The outcome of one job. Transport failures stay per-job; one failed
/// submission never aborts the rest of the batch.
#[derive(Debug)]
pub struct GradingJobResult {
    pub id: String,
    pub outcome: Result<GradingOutcome, GenerationError>,
}

/// Grade every job with at most `concurrency` generations in flight.
/// Results arrive in completion order, not submission order.
pub async fn grade_batch(
    engine: &GradingEngine,
    port: &dyn TextGeneration,
    jobs: Vec<GradingJob>,
    concurrency: usize,
) -> Vec<GradingJobResult> {
    let concurrency = concurrency.max(1);
    debug!(jobs = jobs.len(), concurrency, "starting batch grading");

    stream::iter(jobs)
        .map(|job| async move {
            let outcome = engine.grade_submission(port, job.request).await;
            if let Err(error) = &outcome {
                warn!(job = %job.id, %error, "submission failed");
            }
            GradingJobResult {
                id: job.id,
                outcome,
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await
}

/// Aggregate view of a finished batch.
#[derive(Debug, Default, PartialEq)]
pub struct BatchSummary {
    pub total: usize,
    pub graded: usize,
    pub ungraded: usize,
    pub transport_failures: usize,
    pub low_quality: usize,
    pub grade_counts: BTreeMap<String, usize>,
}

pub fn summarize(results: &[GradingJobResult]) -> BatchSummary {
    let mut summary = BatchSummary {
        total: results.len(),
        ..BatchSummary::default()
    };

    for result in results {
        match &result.outcome {
            Ok(outcome) => {
                let record = &outcome.record;
                if record.is_graded() {
                    summary.graded += 1;
                    *summary.grade_counts.entry(record.grade.clone()).or_insert(0) += 1;
                } else {
                    summary.ungraded += 1;
                }
                if record.provenance.is_low_quality() {
                    summary.low_quality += 1;
                }
            }
            Err(_) => summary.transport_failures += 1,
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::test_support::ScriptedPort;

    fn job(id: &str, essay: &str) -> GradingJob {
        GradingJob::new(id, GenerationRequest::new("grade this submission", essay))
    }

    #[tokio::test]
    async fn all_jobs_complete_independently() {
        let port = ScriptedPort(|request: &GenerationRequest| {
            if request.user_prompt.contains("broken") {
                Err(GenerationError::EmptyResponse)
            } else {
                Ok(r#"{"grade": "A", "detailed_feedback": "Fine."}"#.to_string())
            }
        });

        let jobs = vec![job("s1", "first essay"), job("s2", "broken essay"), job("s3", "third essay")];
        let results = grade_batch(&GradingEngine::default(), &port, jobs, 2).await;

        assert_eq!(results.len(), 3);
        let failed: Vec<_> = results
            .iter()
            .filter(|result| result.outcome.is_err())
            .map(|result| result.id.as_str())
            .collect();
        assert_eq!(failed, vec!["s2"]);
    }

    #[tokio::test]
    async fn zero_concurrency_is_clamped() {
        let port = ScriptedPort(|_: &GenerationRequest| {
            Ok(r#"{"grade": "B", "detailed_feedback": "Fine."}"#.to_string())
        });

        let results = grade_batch(&GradingEngine::default(), &port, vec![job("only", "essay")], 0).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].outcome.is_ok());
    }

    #[tokio::test]
    async fn summary_counts_grades_and_failures() {
        let port = ScriptedPort(|request: &GenerationRequest| {
            if request.user_prompt.contains("down") {
                Err(GenerationError::EmptyResponse)
            } else if request.user_prompt.contains("prose") {
                Ok("Thoughtful work with a few gaps.".to_string())
            } else {
                Ok(r#"{"grade": "A", "detailed_feedback": "Strong."}"#.to_string())
            }
        });

        let jobs = vec![
            job("a", "essay one"),
            job("b", "essay two"),
            job("c", "prose reply"),
            job("d", "server down"),
        ];
        let results = grade_batch(&GradingEngine::default(), &port, jobs, DEFAULT_CONCURRENCY).await;
        let summary = summarize(&results);

        assert_eq!(summary.total, 4);
        assert_eq!(summary.graded, 2);
        assert_eq!(summary.ungraded, 1);
        assert_eq!(summary.transport_failures, 1);
        assert_eq!(summary.low_quality, 1);
        assert_eq!(summary.grade_counts.get("A"), Some(&2));
    }
}
