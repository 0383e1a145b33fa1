//! Model-based text condensation.
//!
//! Two modes with distinct system instructions: `Input` must keep a
//! question a question (the condensed text replaces the user's request,
//! so collapsing it to a statement or an answer would corrupt the turn),
//! `Output` always produces a declarative statement. An inference failure
//! propagates — condensation is never silently skipped, because skipping
//! would defeat the budget invariant.

use chatbox_core::error::InferenceError;
use chatbox_core::inference::{GenerationParams, InferenceBackend};
use chatbox_core::prompt::{MarkupFamily, Prompt, Role};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Which condensation contract applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CondenseMode {
    /// Shorten a user request. Interrogative form is preserved: a
    /// question stays a question and is never answered.
    Input,
    /// Shorten a model response into a declarative statement regardless
    /// of the input's form.
    Output,
}

impl CondenseMode {
    fn system_instruction(&self, word_limit: usize) -> String {
        match self {
            Self::Input => format!(
                "You are a summarization assistant. Summarize the text provided by \
                 the user in under {word_limit} words, keeping its original intent. \
                 If the text is a question, the summary must remain a question in \
                 interrogative form. Never answer the question. Output only the \
                 summary, with no preamble."
            ),
            Self::Output => format!(
                "You are a summarization assistant. Summarize the text provided by \
                 the user in under {word_limit} words as a declarative statement, \
                 regardless of the form of the input. Do not add information that \
                 is not in the text. Output only the summary, with no preamble."
            ),
        }
    }
}

/// Condenses text by prompting the inference backend.
pub struct Condenser {
    backend: Arc<dyn InferenceBackend>,
    markup: MarkupFamily,
    word_limit: usize,
    temperature: f32,
}

impl Condenser {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        markup: MarkupFamily,
        word_limit: usize,
        temperature: f32,
    ) -> Self {
        Self {
            backend,
            markup,
            word_limit,
            temperature,
        }
    }

    /// Produce a shortened version of `text` under the configured word
    /// limit.
    pub async fn condense(&self, text: &str, mode: CondenseMode) -> Result<String, InferenceError> {
        let mut prompt = Prompt::system(mode.system_instruction(self.word_limit));
        prompt.push(Role::User, format!("Summarizing the following text: {text}"));

        let params = GenerationParams {
            temperature: self.temperature,
            stop: self.markup.stop_sequences(),
            ..GenerationParams::default()
        };

        let condensed = self
            .backend
            .generate(&prompt.render(self.markup), &params)
            .await?;
        let condensed = condensed.trim().to_string();

        debug!(
            ?mode,
            source_len = text.len(),
            condensed_len = condensed.len(),
            "Condensation complete"
        );
        Ok(condensed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Echoes a fixed reply and records every prompt it was given.
    struct EchoBackend {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl EchoBackend {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.into(),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl InferenceBackend for EchoBackend {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(
            &self,
            prompt: &str,
            _params: &GenerationParams,
        ) -> Result<String, InferenceError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn input_mode_asks_to_preserve_question_form() {
        let backend = Arc::new(EchoBackend::new("Shorter question?"));
        let condenser = Condenser::new(backend.clone(), MarkupFamily::Llama3, 150, 0.1);

        let out = condenser
            .condense("A very long question about relays?", CondenseMode::Input)
            .await
            .unwrap();
        assert!(out.ends_with('?'));

        let prompts = backend.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("must remain a question"));
        assert!(prompts[0].contains("Summarizing the following text: A very long question"));
    }

    #[tokio::test]
    async fn output_mode_asks_for_a_declarative_statement() {
        let backend = Arc::new(EchoBackend::new("Relays switch loads."));
        let condenser = Condenser::new(backend.clone(), MarkupFamily::Llama3, 150, 0.1);

        condenser
            .condense("Long response text", CondenseMode::Output)
            .await
            .unwrap();

        let prompts = backend.prompts.lock().unwrap();
        assert!(prompts[0].contains("declarative statement"));
        assert!(!prompts[0].contains("must remain a question"));
    }

    #[tokio::test]
    async fn word_limit_appears_in_instruction() {
        let backend = Arc::new(EchoBackend::new("short"));
        let condenser = Condenser::new(backend.clone(), MarkupFamily::Llama3, 50, 0.1);
        condenser.condense("text", CondenseMode::Output).await.unwrap();
        assert!(backend.prompts.lock().unwrap()[0].contains("under 50 words"));
    }

    #[tokio::test]
    async fn condensed_reply_is_trimmed() {
        let backend = Arc::new(EchoBackend::new("  padded  \n"));
        let condenser = Condenser::new(backend, MarkupFamily::Llama3, 150, 0.1);
        let out = condenser.condense("text", CondenseMode::Input).await.unwrap();
        assert_eq!(out, "padded");
    }
}
