//! Binary topical validation.
//!
//! The model is asked to answer with one of two literal tokens. Since
//! the acceptance token is a substring of the rejection token, the raw
//! output is disambiguated by stripping rejection occurrences before
//! looking for acceptance. Acceptance is the default unless rejection is
//! unambiguous — the model does not always follow format instructions.

use chatbox_core::error::InferenceError;
use chatbox_core::inference::{GenerationParams, InferenceBackend};
use chatbox_core::prompt::{MarkupFamily, Prompt, Role};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const ACCEPT_TOKEN: &str = "Validated";
pub const REJECT_TOKEN: &str = "Not Validated";

/// The closed two-valued classification a validation call produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Accepted,
    Rejected,
}

/// Resolve a raw model output into a [`Verdict`].
///
/// Rejected only when the rejection token appears and no acceptance
/// token survives outside of it.
pub fn parse_verdict(raw: &str) -> Verdict {
    let stripped = raw.replace(REJECT_TOKEN, "");
    if stripped.contains(ACCEPT_TOKEN) {
        Verdict::Accepted
    } else if raw.contains(REJECT_TOKEN) {
        Verdict::Rejected
    } else {
        Verdict::Accepted
    }
}

/// Classifies text as topically acceptable or not.
pub struct Validator {
    backend: Arc<dyn InferenceBackend>,
    markup: MarkupFamily,
    topic: String,
    temperature: f32,
}

impl Validator {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        markup: MarkupFamily,
        topic: &str,
        temperature: f32,
    ) -> Self {
        Self {
            backend,
            markup,
            topic: topic.to_string(),
            temperature,
        }
    }

    pub async fn validate(&self, text: &str) -> Result<Verdict, InferenceError> {
        let mut prompt = Prompt::system(format!(
            "You are a content validator for the topic of {topic}. Determine \
             whether the text provided by the user is relevant to {topic}. \
             Respond with exactly '{ACCEPT_TOKEN}' if it is relevant, and with \
             exactly '{REJECT_TOKEN}' if it is not. Output nothing else.",
            topic = self.topic,
        ));
        prompt.push(Role::User, text);

        let params = GenerationParams {
            temperature: self.temperature,
            stop: self.markup.stop_sequences(),
            ..GenerationParams::default()
        };

        let raw = self
            .backend
            .generate(&prompt.render(self.markup), &params)
            .await?;
        let verdict = parse_verdict(&raw);

        debug!(raw = %raw.trim(), ?verdict, "Validation complete");
        Ok(verdict)
    }
}
