//! Inference and token-estimation traits — the abstraction over the
//! model runtime.
//!
//! An `InferenceBackend` takes a fully serialized prompt string and decoding
//! parameters and returns generated text. The pipeline never sees model
//! weights, tokenizers, or devices — those live in the implementation crate.

use crate::error::InferenceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Decoding parameters for a single generation call.
///
/// These are configuration, not derived state: the pipeline passes them
/// through unchanged from `chatbox-config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Maximum tokens to generate. `None` means "until EOS".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Temperature (lower = more deterministic).
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Nucleus sampling probability.
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Stop sequences beyond the model's own EOS token.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

fn default_temperature() -> f32 {
    0.5
}

fn default_top_p() -> f32 {
    0.5
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: None,
            temperature: default_temperature(),
            top_p: default_top_p(),
            stop: Vec::new(),
        }
    }
}

/// The core inference trait.
///
/// Implementations: Candle-based local GGUF runner, stub backends for tests.
/// One loaded model handles one prompt at a time; serialization of
/// concurrent calls is the backend's concern, not the pipeline's.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// A human-readable name for this backend (e.g., "local").
    fn name(&self) -> &str;

    /// Generate a completion for the given serialized prompt.
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> std::result::Result<String, InferenceError>;
}

/// Converts a text into an integer cost for budget decisions.
///
/// Two strategies are supported: exact token counts from the same tokenizer
/// family the backend uses, and a whitespace word-count approximation.
/// The configured thresholds are calibrated against the exact strategy;
/// each implementation documents which one it is.
pub trait TokenEstimator: Send + Sync {
    /// The strategy name (e.g., "tokenizer", "words").
    fn name(&self) -> &str;

    /// Non-negative cost of the text. Empty text costs zero.
    fn estimate(&self, text: &str) -> usize;
}
