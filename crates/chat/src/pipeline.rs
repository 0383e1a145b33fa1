//! The per-request conversation pipeline.
//!
//! One linear pass: fetch history, budget-check the user turn, assemble
//! the prompt, generate, gate through the validator, budget-check the
//! response, record the turn. No branching back.

use crate::condense::{CondenseMode, Condenser};
use crate::validate::{Validator, Verdict};
use chatbox_config::{AppConfig, BudgetConfig, BudgetPolicy};
use chatbox_core::error::{Error, InferenceError};
use chatbox_core::inference::{GenerationParams, InferenceBackend, TokenEstimator};
use chatbox_core::prompt::{render_exchange, render_user_turn, MarkupFamily, Prompt, Role};
use chatbox_core::store::{NewTurn, TurnStore};
use chatbox_core::turn::{ConversationTurn, SessionId};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Returned to the client instead of the model's answer when the
/// validation gate rejects it.
pub const REFUSAL_MESSAGE: &str =
    "Sorry, I can only help with questions related to my configured topic.";

/// The result of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    /// The request text as actually sent to the model (post-condensation
    /// if condensation occurred).
    pub user_text: String,

    /// The response returned to the client.
    pub response: String,

    /// Present only when the response exceeded the output budget.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summarized_response: Option<String>,

    /// The prior exchanges replayed as context, rendered as they appeared
    /// in the assembled prompt.
    pub context: Vec<String>,
}

/// The orchestrating pipeline. Explicitly constructed and dependency-
/// injected; holds no process-wide globals.
pub struct ChatPipeline {
    backend: Arc<dyn InferenceBackend>,
    store: Arc<dyn TurnStore>,
    estimator: Arc<dyn TokenEstimator>,
    condenser: Condenser,
    validator: Validator,
    validation_enabled: bool,
    markup: MarkupFamily,
    system_instruction: String,
    decoding: GenerationParams,
    budget: BudgetConfig,
}

impl ChatPipeline {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        store: Arc<dyn TurnStore>,
        estimator: Arc<dyn TokenEstimator>,
        config: &AppConfig,
    ) -> Self {
        let markup = config.model.markup;
        let condenser = Condenser::new(
            backend.clone(),
            markup,
            config.condenser.word_limit,
            config.condenser.temperature,
        );
        let validator = Validator::new(
            backend.clone(),
            markup,
            &config.validation.topic,
            config.validation.temperature,
        );
        let mut decoding = config.model.decoding.clone();
        decoding.stop = markup.stop_sequences();

        Self {
            backend,
            store,
            estimator,
            condenser,
            validator,
            validation_enabled: config.validation.enabled,
            markup,
            system_instruction: config.model.system_instruction.clone(),
            decoding,
            budget: config.budget.clone(),
        }
    }

    /// Run the full pipeline for one request.
    pub async fn handle(&self, session_id: &SessionId, request: &str) -> Result<ChatOutcome, Error> {
        let mut history = self
            .store
            .fetch_context(session_id, self.budget.history_limit)
            .await?;

        // Budget-check the current user turn as it will appear in the
        // assembled prompt. Strictly greater than: a turn exactly at the
        // threshold is not condensed.
        let mut user_text = request.to_string();
        if self.budget.policy == BudgetPolicy::Condense {
            let block = render_user_turn(&user_text, self.markup);
            let cost = self.estimator.estimate(&block);
            if cost > self.budget.input_threshold {
                info!(cost, threshold = self.budget.input_threshold, "Condensing user input");
                user_text = self.condenser.condense(&user_text, CondenseMode::Input).await?;
            }
        }

        let mut prompt = self.assemble(&history, &user_text);

        if self.budget.policy == BudgetPolicy::Truncate {
            // The ceiling is defined over whitespace words of the whole
            // rendered prompt, independent of the configured estimator.
            while word_count(&prompt.render(self.markup)) > self.budget.truncate_word_ceiling
                && !history.is_empty()
            {
                let dropped = history.remove(0);
                debug!(sequence_id = dropped.sequence_id, "Dropping oldest turn to fit budget");
                prompt = self.assemble(&history, &user_text);
            }
        }

        let raw = self.generate(&prompt.render(self.markup)).await?;

        let (response, summarized_response) = if self.validation_enabled
            && self.validator.validate(&raw).await? == Verdict::Rejected
        {
            warn!(session_id = %session_id, "Response rejected by validation gate");
            (REFUSAL_MESSAGE.to_string(), None)
        } else {
            let mut condensed = None;
            if self.budget.policy == BudgetPolicy::Condense {
                let cost = self.estimator.estimate(&raw);
                if cost > self.budget.output_threshold {
                    info!(cost, threshold = self.budget.output_threshold, "Condensing response");
                    condensed = Some(self.condenser.condense(&raw, CondenseMode::Output).await?);
                }
            }
            (raw, condensed)
        };

        // Recording failure is an error, never a silent success: the
        // client must not believe a turn exists that was never written.
        self.store
            .record(NewTurn {
                session_id: session_id.clone(),
                user_text: user_text.clone(),
                response_text: response.clone(),
                condensed_response_text: summarized_response.clone(),
            })
            .await?;

        let context = history
            .iter()
            .map(|t| render_exchange(&t.user_text, &t.response_text, self.markup))
            .collect();

        Ok(ChatOutcome {
            user_text,
            response,
            summarized_response,
            context,
        })
    }

    /// Direct condenser access, for the standalone summarize endpoint.
    pub async fn condense(&self, text: &str, mode: CondenseMode) -> Result<String, InferenceError> {
        self.condenser.condense(text, mode).await
    }

    /// Direct validator access, for the standalone validation endpoint.
    /// Always available, whether or not the pipeline's gate is enabled.
    pub async fn validate(&self, text: &str) -> Result<Verdict, InferenceError> {
        self.validator.validate(text).await
    }

    fn assemble(&self, history: &[ConversationTurn], user_text: &str) -> Prompt {
        let mut prompt = Prompt::system(&self.system_instruction);
        for turn in history {
            prompt.push_exchange(&turn.user_text, &turn.response_text);
        }
        prompt.push(Role::User, user_text);
        prompt
    }

    async fn generate(&self, rendered: &str) -> Result<String, InferenceError> {
        let secs = self.budget.request_timeout_secs;
        if secs == 0 {
            return self.backend.generate(rendered, &self.decoding).await;
        }
        match tokio::time::timeout(
            Duration::from_secs(secs),
            self.backend.generate(rendered, &self.decoding),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(InferenceError::Timeout { timeout_secs: secs }),
        }
    }
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chatbox_core::error::StoreError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Pops scripted replies in order and records every prompt.
    struct ScriptedBackend {
        replies: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl InferenceBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            prompt: &str,
            _params: &GenerationParams,
        ) -> Result<String, InferenceError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| InferenceError::Backend("script exhausted".into()))
        }
    }

    /// Never resolves; for timeout tests.
    struct HangingBackend;

    #[async_trait]
    impl InferenceBackend for HangingBackend {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn generate(
            &self,
            _prompt: &str,
            _params: &GenerationParams,
        ) -> Result<String, InferenceError> {
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct MemStore {
        rows: Mutex<Vec<ConversationTurn>>,
    }

    impl MemStore {
        fn rows(&self) -> Vec<ConversationTurn> {
            self.rows.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TurnStore for MemStore {
        fn name(&self) -> &str {
            "memory"
        }

        async fn record(&self, turn: NewTurn) -> Result<ConversationTurn, StoreError> {
            let mut rows = self.rows.lock().unwrap();
            let recorded = ConversationTurn {
                session_id: turn.session_id,
                sequence_id: rows.len() as i64 + 1,
                user_text: turn.user_text,
                response_text: turn.response_text,
                condensed_response_text: turn.condensed_response_text,
            };
            rows.push(recorded.clone());
            Ok(recorded)
        }

        async fn fetch_context(
            &self,
            session_id: &SessionId,
            limit: usize,
        ) -> Result<Vec<ConversationTurn>, StoreError> {
            let rows = self.rows.lock().unwrap();
            let mut matching: Vec<ConversationTurn> = rows
                .iter()
                .filter(|t| &t.session_id == session_id)
                .cloned()
                .collect();
            let skip = matching.len().saturating_sub(limit);
            Ok(matching
                .drain(skip..)
                .map(ConversationTurn::into_context_form)
                .collect())
        }

        async fn history(
            &self,
            session_id: &SessionId,
        ) -> Result<Vec<ConversationTurn>, StoreError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|t| &t.session_id == session_id)
                .cloned()
                .collect())
        }

        async fn delete_session(&self, session_id: &SessionId) -> Result<u64, StoreError> {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|t| &t.session_id != session_id);
            Ok((before - rows.len()) as u64)
        }
    }

    /// Whitespace word count; thresholds in these tests are in words.
    struct WordEstimator;

    impl TokenEstimator for WordEstimator {
        fn name(&self) -> &str {
            "words"
        }

        fn estimate(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        // Generous thresholds; individual tests tighten what they probe.
        config.budget.input_threshold = 64;
        config.budget.output_threshold = 32;
        config
    }

    fn pipeline(
        backend: Arc<dyn InferenceBackend>,
        store: Arc<MemStore>,
        config: &AppConfig,
    ) -> ChatPipeline {
        ChatPipeline::new(backend, store, Arc::new(WordEstimator), config)
    }

    #[tokio::test]
    async fn short_prompt_skips_condensation_and_returns_verbatim() {
        let backend = ScriptedBackend::new(&["Short answer"]);
        let store = Arc::new(MemStore::default());
        let p = pipeline(backend.clone(), store.clone(), &test_config());

        let out = p
            .handle(&SessionId::from("s1"), "What is a relay?")
            .await
            .unwrap();

        assert_eq!(out.response, "Short answer");
        assert!(out.summarized_response.is_none());
        assert_eq!(out.user_text, "What is a relay?");
        assert!(out.context.is_empty());
        // Exactly one inference call: the main generation.
        assert_eq!(backend.prompts().len(), 1);

        let rows = store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_text, "What is a relay?");
        assert!(rows[0].condensed_response_text.is_none());
    }

    #[tokio::test]
    async fn over_budget_input_is_condensed_before_generation() {
        // First reply condenses the input, second is the main answer.
        let backend = ScriptedBackend::new(&["How do relays work?", "Answer"]);
        let store = Arc::new(MemStore::default());
        let mut config = test_config();
        config.budget.input_threshold = 5;
        let p = pipeline(backend.clone(), store.clone(), &config);

        let long_request =
            "Could you please explain to me in detail how electromechanical relays work";
        let out = p.handle(&SessionId::from("s1"), long_request).await.unwrap();

        let prompts = backend.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("Summarizing the following text:"));
        // The main prompt carries the condensed form, not the original.
        assert!(prompts[1].contains("How do relays work?"));
        assert!(!prompts[1].contains("electromechanical"));

        assert_eq!(out.user_text, "How do relays work?");
        assert_eq!(store.rows()[0].user_text, "How do relays work?");
    }

    #[tokio::test]
    async fn input_exactly_at_threshold_is_not_condensed() {
        let backend = ScriptedBackend::new(&["Answer"]);
        let store = Arc::new(MemStore::default());
        let mut config = test_config();
        // Threshold set to the exact rendered cost: the boundary is exclusive.
        let rendered = render_user_turn("a b c", MarkupFamily::Llama3);
        config.budget.input_threshold = rendered.split_whitespace().count();
        let p = pipeline(backend.clone(), store, &config);

        p.handle(&SessionId::from("s1"), "a b c").await.unwrap();
        assert_eq!(backend.prompts().len(), 1);
    }

    #[tokio::test]
    async fn over_budget_response_is_condensed_after_generation() {
        let backend = ScriptedBackend::new(&[
            "A very long answer about relays that runs on and on",
            "Relays switch loads.",
        ]);
        let store = Arc::new(MemStore::default());
        let mut config = test_config();
        config.budget.output_threshold = 5;
        let p = pipeline(backend.clone(), store.clone(), &config);

        let out = p.handle(&SessionId::from("s1"), "Short?").await.unwrap();

        // The raw answer is still what the client sees.
        assert!(out.response.starts_with("A very long answer"));
        assert_eq!(out.summarized_response.as_deref(), Some("Relays switch loads."));

        let rows = store.rows();
        assert!(rows[0].response_text.starts_with("A very long answer"));
        assert_eq!(
            rows[0].condensed_response_text.as_deref(),
            Some("Relays switch loads.")
        );
    }

    #[tokio::test]
    async fn condensed_history_is_replayed_in_place_of_raw_response() {
        let backend = ScriptedBackend::new(&["Next answer"]);
        let store = Arc::new(MemStore::default());
        store
            .record(NewTurn {
                session_id: SessionId::from("s1"),
                user_text: "Q1".into(),
                response_text: "The original very long answer".into(),
                condensed_response_text: Some("Condensed A1".into()),
            })
            .await
            .unwrap();
        let p = pipeline(backend.clone(), store, &test_config());

        let out = p.handle(&SessionId::from("s1"), "Q2").await.unwrap();

        let main_prompt = &backend.prompts()[0];
        assert!(main_prompt.contains("Condensed A1"));
        assert!(!main_prompt.contains("original very long answer"));
        assert_eq!(out.context.len(), 1);
        assert!(out.context[0].contains("Condensed A1"));
    }

    #[tokio::test]
    async fn history_is_capped_and_chronological() {
        let backend = ScriptedBackend::new(&["Answer"]);
        let store = Arc::new(MemStore::default());
        for i in 1..=7 {
            store
                .record(NewTurn {
                    session_id: SessionId::from("s1"),
                    user_text: format!("Q{i}"),
                    response_text: format!("A{i}"),
                    condensed_response_text: None,
                })
                .await
                .unwrap();
        }
        let p = pipeline(backend.clone(), store, &test_config());

        p.handle(&SessionId::from("s1"), "Q8").await.unwrap();

        let main_prompt = &backend.prompts()[0];
        // Five most recent turns, oldest dropped.
        assert!(!main_prompt.contains("Q2"));
        assert!(main_prompt.contains("Q3"));
        assert!(main_prompt.contains("Q7"));
        let q3 = main_prompt.find("Q3").unwrap();
        let q7 = main_prompt.find("Q7").unwrap();
        let q8 = main_prompt.find("Q8").unwrap();
        assert!(q3 < q7 && q7 < q8);
    }

    #[tokio::test]
    async fn truncate_policy_drops_oldest_until_under_ceiling() {
        let backend = ScriptedBackend::new(&["Answer"]);
        let store = Arc::new(MemStore::default());
        for i in 1..=3 {
            store
                .record(NewTurn {
                    session_id: SessionId::from("s1"),
                    user_text: format!("question number {i} with quite a few extra words in it"),
                    response_text: format!("answer number {i} with quite a few extra words in it"),
                    condensed_response_text: None,
                })
                .await
                .unwrap();
        }
        let mut config = test_config();
        config.model.system_instruction = "Be concise.".into();
        config.budget.policy = BudgetPolicy::Truncate;
        config.budget.truncate_word_ceiling = 60;
        let p = pipeline(backend.clone(), store.clone(), &config);

        let out = p.handle(&SessionId::from("s1"), "current question").await.unwrap();

        let prompts = backend.prompts();
        // Truncation never calls the condenser.
        assert_eq!(prompts.len(), 1);
        assert!(!prompts[0].contains("question number 1"));
        assert!(prompts[0].contains("question number 3"));
        assert!(word_count(&prompts[0]) <= 60);
        // Under truncation nothing is ever condensed.
        assert!(out.summarized_response.is_none());
        assert!(store.rows().last().unwrap().condensed_response_text.is_none());
    }

    #[tokio::test]
    async fn rejected_response_becomes_fixed_refusal() {
        let backend = ScriptedBackend::new(&[
            "A long off-topic answer with many words well past the output threshold",
            "Not Validated",
        ]);
        let store = Arc::new(MemStore::default());
        let mut config = test_config();
        config.validation.enabled = true;
        config.budget.output_threshold = 3;
        let p = pipeline(backend.clone(), store.clone(), &config);

        let out = p.handle(&SessionId::from("s1"), "Something off topic").await.unwrap();

        assert_eq!(out.response, REFUSAL_MESSAGE);
        assert!(out.summarized_response.is_none());
        // Rejection short-circuits output condensation: two calls only.
        assert_eq!(backend.prompts().len(), 2);
        assert!(backend.prompts()[1].contains("content validator"));

        let rows = store.rows();
        assert_eq!(rows[0].response_text, REFUSAL_MESSAGE);
        assert!(rows[0].condensed_response_text.is_none());
    }

    #[tokio::test]
    async fn accepted_response_passes_the_gate() {
        let backend = ScriptedBackend::new(&["On-topic answer", "Validated"]);
        let store = Arc::new(MemStore::default());
        let mut config = test_config();
        config.validation.enabled = true;
        let p = pipeline(backend.clone(), store, &config);

        let out = p.handle(&SessionId::from("s1"), "On topic?").await.unwrap();
        assert_eq!(out.response, "On-topic answer");
    }

    #[tokio::test(start_paused = true)]
    async fn generation_timeout_surfaces_error_and_records_nothing() {
        let store = Arc::new(MemStore::default());
        let mut config = test_config();
        config.budget.request_timeout_secs = 5;
        let p = pipeline(Arc::new(HangingBackend), store.clone(), &config);

        let err = p.handle(&SessionId::from("s1"), "Hello").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Inference(InferenceError::Timeout { timeout_secs: 5 })
        ));
        assert!(store.rows().is_empty());
    }

    #[tokio::test]
    async fn backend_failure_propagates_without_recording() {
        // Empty script: the first generate call fails.
        let backend = ScriptedBackend::new(&[]);
        let store = Arc::new(MemStore::default());
        let p = pipeline(backend, store.clone(), &test_config());

        let err = p.handle(&SessionId::from("s1"), "Hello").await.unwrap_err();
        assert!(matches!(err, Error::Inference(_)));
        assert!(store.rows().is_empty());
    }
}
