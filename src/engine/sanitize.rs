use regex::Regex;

use crate::config::SanitizerSettings;

/// Two idempotent cleaning passes for model-written feedback text: removal
/// of leaked "AI Detection Keywords" markers the prompt forbids, and removal
/// of boundary-anchored generic praise phrases.
pub struct TextSanitizer {
    artifact_patterns: Vec<Regex>,
    phrase_patterns: Vec<Regex>,
    squeeze_newlines: Regex,
    squeeze_spaces: Regex,
    squeeze_periods: Regex,
    period_pairs: Regex,
}

impl TextSanitizer {
    pub fn new(settings: &SanitizerSettings) -> Self {
        let artifact_patterns = [
            r"(?i)\n+\s*AI detection keywords?:\s*\[[^\]]*\]",
            r"(?i)\n+\s*AI detection keywords?:\s*None",
            r"(?i)\n+\s*AI detection keywords?:[^\n]*",
            r"(?i)\s*AI detection keywords?:[^\n]*",
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("hard-coded artifact pattern"))
        .collect();

        // Each phrase must sit on a sentence boundary: preceded by the start
        // of the text, terminal punctuation, or a newline, and followed by
        // punctuation, a newline, or the end. Substrings of longer sentences
        // never match.
        let phrase_patterns = settings
            .generic_phrases
            .iter()
            .map(|phrase| {
                let pattern = format!(
                    r"(?i)(^\s*|[.!?]\s+|\n\s*){}(?:[.!]+\s*|\s*\n|\s*$)",
                    regex::escape(phrase)
                );
                Regex::new(&pattern).expect("escaped phrase pattern")
            })
            .collect();

        Self {
            artifact_patterns,
            phrase_patterns,
            squeeze_newlines: Regex::new(r"\n{3,}").expect("hard-coded pattern"),
            squeeze_spaces: Regex::new(r"\s{2,}").expect("hard-coded pattern"),
            squeeze_periods: Regex::new(r"\.{2,}").expect("hard-coded pattern"),
            period_pairs: Regex::new(r"\.\s*\.").expect("hard-coded pattern"),
        }
    }

    /// Strip echoed "AI Detection Keywords: [...]" markers, wherever they
    /// appear, then collapse runs of three or more newlines down to two.
    pub fn strip_artifacts(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return text.to_string();
        }

        let mut cleaned = text.to_string();
        for pattern in &self.artifact_patterns {
            cleaned = pattern.replace_all(&cleaned, "").into_owned();
        }

        let cleaned = self.squeeze_newlines.replace_all(&cleaned, "\n\n");
        cleaned.trim().to_string()
    }

    /// Strip catalogued praise phrases at sentence boundaries, then collapse
    /// the whitespace and punctuation left behind.
    pub fn strip_generic_phrases(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return text.to_string();
        }

        // `replace_all` resumes scanning after each match, so a phrase
        // repeated back-to-back keeps its second occurrence (its boundary
        // was consumed by the first match). Re-run the phrase passes until
        // nothing changes; every replacement shortens the string, so this
        // terminates.
        let mut cleaned = text.to_string();
        loop {
            let mut changed = false;
            for pattern in &self.phrase_patterns {
                let next = pattern.replace_all(&cleaned, "${1}");
                if next != cleaned {
                    cleaned = next.into_owned();
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let cleaned = self.squeeze_spaces.replace_all(&cleaned, " ");
        let cleaned = self.squeeze_periods.replace_all(&cleaned, ".");
        let cleaned = self.period_pairs.replace_all(&cleaned, ".");
        cleaned.trim().to_string()
    }

    /// Both passes in the order the grading pipeline applies them.
    pub fn clean(&self, text: &str) -> String {
        self.strip_generic_phrases(&self.strip_artifacts(text))
    }
}

impl Default for TextSanitizer {
    fn default() -> Self {
        Self::new(&SanitizerSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitizer() -> TextSanitizer {
        TextSanitizer::default()
    }

    #[test]
    fn artifact_marker_removed_from_end() {
        let input = "The essay is well structured.\n\n\nAI Detection Keywords: ['chatgpt']";
        assert_eq!(
            sanitizer().strip_artifacts(input),
            "The essay is well structured."
        );
    }

    #[test]
    fn artifact_marker_removed_mid_text() {
        let input = "Before the marker.\nAI detection keywords: None\nAfter the marker.";
        assert_eq!(
            sanitizer().strip_artifacts(input),
            "Before the marker.\nAfter the marker."
        );
    }

    #[test]
    fn artifact_marker_with_free_text_removed_to_end_of_line() {
        let input = "Solid analysis. AI Detection Keywords: none were found here\nNext paragraph.";
        let cleaned = sanitizer().strip_artifacts(input);
        assert!(!cleaned.to_lowercase().contains("detection keywords"));
        assert!(cleaned.contains("Next paragraph."));
    }

    #[test]
    fn artifact_removal_is_idempotent() {
        let input = "Feedback.\n\n\n\nAI Detection Keywords: []\n\nMore feedback.";
        let once = sanitizer().strip_artifacts(input);
        let twice = sanitizer().strip_artifacts(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn artifact_removal_leaves_empty_input_unchanged() {
        assert_eq!(sanitizer().strip_artifacts(""), "");
        assert_eq!(sanitizer().strip_artifacts("   "), "   ");
    }

    #[test]
    fn generic_phrase_removed_at_start() {
        let cleaned = sanitizer().strip_generic_phrases("Good job! The analysis was solid.");
        assert_eq!(cleaned, "The analysis was solid.");
    }

    #[test]
    fn generic_phrase_removed_at_end() {
        let cleaned =
            sanitizer().strip_generic_phrases("The proof is rigorous. Keep up the good work!");
        assert_eq!(cleaned, "The proof is rigorous.");
    }

    #[test]
    fn phrase_inside_longer_sentence_is_kept() {
        let input = "He did a good job explaining recursion.";
        assert_eq!(sanitizer().strip_generic_phrases(input), input);
    }

    #[test]
    fn phrase_starting_a_longer_sentence_is_kept() {
        let input = "Good job explaining recursion here.";
        assert_eq!(sanitizer().strip_generic_phrases(input), input);
    }

    #[test]
    fn consecutive_phrases_all_removed() {
        let cleaned =
            sanitizer().strip_generic_phrases("Good job! Well done! The citations are complete.");
        assert_eq!(cleaned, "The citations are complete.");
    }

    #[test]
    fn repeated_phrase_is_fully_removed_in_one_pass() {
        let once =
            sanitizer().strip_generic_phrases("Good job! Good job! The thesis is sound.");
        assert_eq!(once, "The thesis is sound.");
        let twice = sanitizer().strip_generic_phrases(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn phrase_removal_is_idempotent() {
        let input = "Strong thesis. Great work! Needs more sources. Keep it up!";
        let once = sanitizer().strip_generic_phrases(input);
        let twice = sanitizer().strip_generic_phrases(&once);
        assert_eq!(once, twice);
        assert!(!once.contains("Great work"));
        assert!(!once.contains("Keep it up"));
    }

    #[test]
    fn phrase_removal_respects_custom_catalogue() {
        let settings = SanitizerSettings::with_phrases(vec!["Fantastic effort".to_string()]);
        let sanitizer = TextSanitizer::new(&settings);
        let cleaned = sanitizer.strip_generic_phrases("Fantastic effort! The data holds up.");
        assert_eq!(cleaned, "The data holds up.");
        // Default catalogue entries are no longer stripped.
        let kept = sanitizer.strip_generic_phrases("Good job! The data holds up.");
        assert!(kept.contains("Good job"));
    }
}
