//! Inference backends and token estimators.
//!
//! The local Candle-based GGUF runner lives behind the `local` feature so
//! the default build stays light; the word-count estimator is always
//! available.
//!
//! ```bash
//! cargo build -p chatbox-inference --features local
//! ```

pub mod estimator;

#[cfg(feature = "local")]
pub mod local;

pub use estimator::WordCountEstimator;

#[cfg(feature = "local")]
pub use estimator::TokenizerEstimator;
#[cfg(feature = "local")]
pub use local::LocalBackend;
