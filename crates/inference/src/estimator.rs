//! Token estimators — the cost functions behind budget decisions.
//!
//! Two strategies: exact token counts from the same tokenizer family the
//! backend decodes with, and a whitespace word count. The configured
//! thresholds assume the exact strategy; the word count exists for builds
//! without the `local` feature and for the truncation budget policy, which
//! was defined in words from the start.

use chatbox_core::inference::TokenEstimator;

/// Whitespace word-count approximation.
///
/// `estimate("a  b\nc")` is 3. Markup tokens like `<|eot_id|>` count as
/// part of whichever whitespace-delimited word they touch.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordCountEstimator;

impl TokenEstimator for WordCountEstimator {
    fn name(&self) -> &str {
        "words"
    }

    fn estimate(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

#[cfg(feature = "local")]
pub use tokenizer_estimator::TokenizerEstimator;

#[cfg(feature = "local")]
mod tokenizer_estimator {
    use super::TokenEstimator;
    use chatbox_core::error::InferenceError;
    use std::sync::Arc;
    use tokenizers::Tokenizer;

    /// Exact token counts from a loaded `tokenizer.json`.
    ///
    /// Counts include special tokens, matching what the backend actually
    /// feeds the model.
    #[derive(Clone)]
    pub struct TokenizerEstimator {
        tokenizer: Arc<Tokenizer>,
    }

    impl TokenizerEstimator {
        pub fn new(tokenizer: Arc<Tokenizer>) -> Self {
            Self { tokenizer }
        }

        pub fn from_file(path: &std::path::Path) -> Result<Self, InferenceError> {
            let tokenizer = Tokenizer::from_file(path)
                .map_err(|e| InferenceError::Tokenizer(format!("Failed to load tokenizer: {e}")))?;
            Ok(Self::new(Arc::new(tokenizer)))
        }
    }

    impl TokenEstimator for TokenizerEstimator {
        fn name(&self) -> &str {
            "tokenizer"
        }

        fn estimate(&self, text: &str) -> usize {
            // Estimation must not fail the request; an unencodable text
            // costs zero, which errs on the side of no condensation.
            self.tokenizer
                .encode(text, true)
                .map(|enc| enc.get_ids().len())
                .unwrap_or(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_count_splits_on_any_whitespace() {
        let est = WordCountEstimator;
        assert_eq!(est.estimate("one two\tthree\nfour"), 4);
        assert_eq!(est.estimate("  padded   words  "), 2);
    }

    #[test]
    fn word_count_empty_is_zero() {
        let est = WordCountEstimator;
        assert_eq!(est.estimate(""), 0);
        assert_eq!(est.estimate("   \n\t "), 0);
    }

    #[test]
    fn word_count_counts_markup_as_words() {
        let est = WordCountEstimator;
        assert_eq!(est.estimate("<|start_header_id|>user<|end_header_id|>"), 1);
    }
}
