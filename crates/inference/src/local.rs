//! Local inference backend — runs GGUF-quantized Llama-family models on
//! your hardware via [Candle](https://github.com/huggingface/candle).
//! Zero internet after the first download, zero API keys.
//!
//! # Example
//! ```bash
//! chatbox serve --model llama3:1b
//! chatbox serve --model /path/to/model.gguf
//! ```

use crate::estimator::TokenizerEstimator;
use async_trait::async_trait;
use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama as qlm;
use chatbox_core::error::InferenceError;
use chatbox_core::inference::{GenerationParams, InferenceBackend};
use hf_hub::api::sync::Api;
use std::path::Path;
use std::sync::Arc;
use tokenizers::Tokenizer;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const DEFAULT_MAX_TOKENS: u32 = 512;
const SAMPLING_SEED: u64 = 42;

// ── Well-known model aliases ───────────────────────────────────────────

/// Model presets — friendly aliases that resolve to HuggingFace repos +
/// filenames.
struct ModelPreset {
    repo: &'static str,
    gguf_file: &'static str,
    tokenizer_repo: &'static str,
}

fn resolve_preset(alias: &str) -> Option<ModelPreset> {
    let alias_lower = alias.to_lowercase();
    match alias_lower.as_str() {
        "llama3:1b" | "llama3-1b" | "llama-3.2-1b" => Some(ModelPreset {
            repo: "bartowski/Llama-3.2-1B-Instruct-GGUF",
            gguf_file: "Llama-3.2-1B-Instruct-Q4_K_M.gguf",
            tokenizer_repo: "unsloth/Llama-3.2-1B-Instruct",
        }),
        "llama3:3b" | "llama3-3b" | "llama-3.2-3b" => Some(ModelPreset {
            repo: "bartowski/Llama-3.2-3B-Instruct-GGUF",
            gguf_file: "Llama-3.2-3B-Instruct-Q4_K_M.gguf",
            tokenizer_repo: "unsloth/Llama-3.2-3B-Instruct",
        }),
        "llama3:8b" | "llama3-8b" | "llama-3-8b" => Some(ModelPreset {
            repo: "QuantFactory/Meta-Llama-3-8B-Instruct-GGUF",
            gguf_file: "Meta-Llama-3-8B-Instruct.Q4_K_M.gguf",
            tokenizer_repo: "unsloth/llama-3-8b-Instruct",
        }),
        "tinyllama" | "tinyllama-1.1b" => Some(ModelPreset {
            repo: "TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF",
            gguf_file: "tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf",
            tokenizer_repo: "TinyLlama/TinyLlama-1.1B-Chat-v1.0",
        }),
        _ => None,
    }
}

// ── Local backend ──────────────────────────────────────────────────────

/// An [`InferenceBackend`] that runs GGUF models locally via Candle.
///
/// Thread-safe: the model is behind a Mutex because Candle inference
/// is inherently single-threaded (CPU tensor ops). Concurrent generation
/// calls are serialized here; the pipeline never has to think about it.
pub struct LocalBackend {
    inner: Arc<Mutex<Option<LocalModelState>>>,
    model_name: String,
}

/// The loaded model state (tokenizer + weights).
struct LocalModelState {
    model: qlm::ModelWeights,
    tokenizer: Arc<Tokenizer>,
    device: Device,
    eos_token_ids: Vec<u32>,
}

impl LocalBackend {
    /// Create a new local backend.
    ///
    /// `model_name` can be a preset alias (`"llama3:1b"`, `"tinyllama"`)
    /// or a path to a local GGUF file. The model is loaded lazily on
    /// first request.
    pub fn new(model_name: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
            model_name: model_name.to_string(),
        }
    }

    /// Eagerly load the model (downloads if needed, then loads into memory).
    pub fn load(model_name: &str) -> Result<Self, InferenceError> {
        let state = LocalModelState::load(model_name)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(Some(state))),
            model_name: model_name.to_string(),
        })
    }

    /// An exact-count estimator sharing this backend's tokenizer.
    ///
    /// Forces a model load if one has not happened yet.
    pub async fn estimator(&self) -> Result<TokenizerEstimator, InferenceError> {
        self.ensure_loaded().await?;
        let guard = self.inner.lock().await;
        let state = guard
            .as_ref()
            .ok_or_else(|| InferenceError::NotConfigured("model state missing".into()))?;
        Ok(TokenizerEstimator::new(state.tokenizer.clone()))
    }

    async fn ensure_loaded(&self) -> Result<(), InferenceError> {
        let state = self.inner.lock().await;
        if state.is_some() {
            return Ok(());
        }
        drop(state);

        info!(model = %self.model_name, "Loading local model on first request...");
        let name = self.model_name.clone();
        let loaded = tokio::task::spawn_blocking(move || LocalModelState::load(&name))
            .await
            .map_err(|e| InferenceError::Backend(format!("Model loading task failed: {e}")))??;

        let mut state = self.inner.lock().await;
        if state.is_none() {
            *state = Some(loaded);
        }
        Ok(())
    }
}

impl LocalModelState {
    /// Load a model by preset alias or GGUF file path.
    fn load(model_name: &str) -> Result<Self, InferenceError> {
        let device = Device::Cpu;

        if Path::new(model_name).exists() && model_name.ends_with(".gguf") {
            return Self::load_from_path(Path::new(model_name), &device);
        }

        let preset = resolve_preset(model_name).ok_or_else(|| {
            InferenceError::ModelNotFound(format!(
                "Unknown local model '{model_name}'. Available presets: llama3:1b, \
                 llama3:3b, llama3:8b, tinyllama. Or provide a path to a .gguf file."
            ))
        })?;

        info!(
            model = model_name,
            repo = preset.repo,
            file = preset.gguf_file,
            "Downloading/loading local model"
        );

        // Download via HuggingFace Hub (cached automatically)
        let api = Api::new().map_err(|e| {
            InferenceError::Backend(format!("Failed to initialize HuggingFace Hub API: {e}"))
        })?;

        let repo = api.model(preset.repo.to_string());
        let model_path = repo.get(preset.gguf_file).map_err(|e| {
            InferenceError::Backend(format!(
                "Failed to download model '{}' from '{}': {e}",
                preset.gguf_file, preset.repo
            ))
        })?;

        info!(path = %model_path.display(), "Model file ready");

        let tokenizer_repo = api.model(preset.tokenizer_repo.to_string());
        let tokenizer_path = tokenizer_repo.get("tokenizer.json").map_err(|e| {
            InferenceError::Backend(format!(
                "Failed to download tokenizer from '{}': {e}",
                preset.tokenizer_repo
            ))
        })?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| InferenceError::Tokenizer(format!("Failed to load tokenizer: {e}")))?;

        Self::from_parts(&model_path, tokenizer, device)
    }

    /// Load from an explicit GGUF file path, expecting a `tokenizer.json`
    /// next to it.
    fn load_from_path(path: &Path, device: &Device) -> Result<Self, InferenceError> {
        info!(path = %path.display(), "Loading local GGUF model");

        let tokenizer_path = path.with_file_name("tokenizer.json");
        if !tokenizer_path.exists() {
            warn!(
                "No tokenizer.json found next to GGUF file at {}",
                path.display()
            );
            return Err(InferenceError::NotConfigured(format!(
                "Expected tokenizer.json next to {}",
                path.display()
            )));
        }

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| InferenceError::Tokenizer(format!("Failed to load tokenizer: {e}")))?;

        Self::from_parts(path, tokenizer, device.clone())
    }

    fn from_parts(
        model_path: &Path,
        tokenizer: Tokenizer,
        device: Device,
    ) -> Result<Self, InferenceError> {
        let mut file = std::fs::File::open(model_path)
            .map_err(|e| InferenceError::NotConfigured(format!("Failed to open model file: {e}")))?;

        let gguf = gguf_file::Content::read(&mut file)
            .map_err(|e| InferenceError::NotConfigured(format!("Failed to parse GGUF file: {e}")))?;

        let model = qlm::ModelWeights::from_gguf(gguf, &mut file, &device)
            .map_err(|e| InferenceError::NotConfigured(format!("Failed to load model weights: {e}")))?;

        // Llama-3 emits <|eot_id|> at turn ends; older models use </s>.
        let eos_token_ids: Vec<u32> = ["<|eot_id|>", "<|end_of_text|>", "</s>", "<|endoftext|>"]
            .iter()
            .filter_map(|t| tokenizer.token_to_id(t))
            .collect();

        info!(?eos_token_ids, "Local model loaded successfully");

        Ok(Self {
            model,
            tokenizer: Arc::new(tokenizer),
            device,
            eos_token_ids,
        })
    }

    /// Run inference: tokenize → generate tokens → decode.
    fn generate(
        &mut self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, InferenceError> {
        // `encode(_, true)` prepends BOS; the prompt text itself must not
        // carry one.
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| InferenceError::Tokenizer(format!("Tokenization failed: {e}")))?;

        let prompt_tokens = encoding.get_ids();
        let max_tokens = params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

        debug!(
            prompt_tokens = prompt_tokens.len(),
            max_tokens,
            temperature = params.temperature,
            top_p = params.top_p,
            "Starting local generation"
        );

        let mut input_ids = Tensor::new(prompt_tokens, &self.device).map_err(map_candle_err)?;
        input_ids = input_ids.unsqueeze(0).map_err(map_candle_err)?;

        let mut logits_processor = if params.temperature <= 0.0 {
            LogitsProcessor::new(SAMPLING_SEED, None, None)
        } else {
            LogitsProcessor::new(
                SAMPLING_SEED,
                Some(params.temperature as f64),
                Some(params.top_p as f64),
            )
        };

        let mut generated_tokens: Vec<u32> = Vec::new();
        let mut next_token_tensor = input_ids;
        // Offset into the KV cache: the full prompt on the first pass,
        // then one token per step.
        let mut index_pos = 0;
        let mut input_len = prompt_tokens.len();
        let mut output = String::new();

        for _ in 0..max_tokens {
            let logits = self
                .model
                .forward(&next_token_tensor, index_pos)
                .map_err(map_candle_err)?;
            index_pos += input_len;
            input_len = 1;

            let logits = logits.squeeze(0).map_err(map_candle_err)?;
            let logits = logits
                .get(logits.dim(0).map_err(map_candle_err)? - 1)
                .map_err(map_candle_err)?;

            let next_token = logits_processor.sample(&logits).map_err(map_candle_err)?;

            if self.eos_token_ids.contains(&next_token) {
                break;
            }

            generated_tokens.push(next_token);

            // Re-decode and scan for configured stop sequences. At chat
            // response lengths the repeated decode is cheap next to the
            // forward pass.
            output = self
                .tokenizer
                .decode(&generated_tokens, true)
                .map_err(|e| InferenceError::Tokenizer(format!("Detokenization failed: {e}")))?;

            if let Some(cut) = params.stop.iter().filter_map(|s| output.find(s)).min() {
                output.truncate(cut);
                break;
            }

            next_token_tensor = Tensor::new(&[next_token][..], &self.device)
                .map_err(map_candle_err)?
                .unsqueeze(0)
                .map_err(map_candle_err)?;
        }

        debug!(
            completion_tokens = generated_tokens.len(),
            output_len = output.len(),
            "Generation complete"
        );

        Ok(output.trim().to_string())
    }
}

fn map_candle_err(e: candle_core::Error) -> InferenceError {
    InferenceError::Backend(format!("Candle inference error: {e}"))
}

#[async_trait]
impl InferenceBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, InferenceError> {
        self.ensure_loaded().await?;

        // Run inference on a blocking thread (Candle is CPU-bound).
        let inner = self.inner.clone();
        let prompt = prompt.to_string();
        let params = params.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.blocking_lock();
            let state = guard
                .as_mut()
                .ok_or_else(|| InferenceError::NotConfigured("model state missing".into()))?;
            state.generate(&prompt, &params)
        })
        .await
        .map_err(|e| InferenceError::Backend(format!("Inference task panicked: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_preset_aliases() {
        assert!(resolve_preset("llama3:1b").is_some());
        assert!(resolve_preset("Llama3:1B").is_some());
        assert!(resolve_preset("llama3:8b").is_some());
        assert!(resolve_preset("tinyllama").is_some());
        assert!(resolve_preset("nonexistent").is_none());
    }

    #[test]
    fn backend_name() {
        let backend = LocalBackend::new("llama3:1b");
        assert_eq!(backend.name(), "local");
    }
}
