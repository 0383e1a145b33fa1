//! `chatbox serve` — Start the HTTP API server.

use chatbox_config::AppConfig;
use chatbox_core::inference::{InferenceBackend, TokenEstimator};
use std::sync::Arc;

pub async fn run(
    port_override: Option<u16>,
    model_override: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.server.port = port;
    }
    if let Some(model) = model_override {
        config.model.model = model;
    }

    let (backend, estimator) = build_runtime(&config).await?;

    println!("Chatbox");
    println!("   Listening: {}:{}", config.server.host, config.server.port);
    println!("   Model: {}", config.model.model);
    println!("   Database: {}", config.database.url);

    chatbox_gateway::start(config, backend, estimator).await?;

    Ok(())
}

#[cfg(feature = "local")]
async fn build_runtime(
    config: &AppConfig,
) -> Result<(Arc<dyn InferenceBackend>, Arc<dyn TokenEstimator>), Box<dyn std::error::Error>> {
    use chatbox_inference::{LocalBackend, WordCountEstimator};

    let backend = Arc::new(LocalBackend::new(&config.model.model));

    // The exact estimator forces an eager model load so the first chat
    // request does not pay the download/load latency.
    let estimator: Arc<dyn TokenEstimator> = match config.budget.estimator.as_str() {
        "tokenizer" => Arc::new(backend.estimator().await?),
        _ => Arc::new(WordCountEstimator),
    };

    Ok((backend, estimator))
}

#[cfg(not(feature = "local"))]
async fn build_runtime(
    _config: &AppConfig,
) -> Result<(Arc<dyn InferenceBackend>, Arc<dyn TokenEstimator>), Box<dyn std::error::Error>> {
    Err("No inference backend compiled in. Rebuild with `--features local` \
         to enable the Candle GGUF runner."
        .into())
}
