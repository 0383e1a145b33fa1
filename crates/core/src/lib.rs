//! # Chatbox Core
//!
//! Domain types, traits, and error definitions for the Chatbox conversation
//! service. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator the pipeline depends on — inference backend, token
//! estimator, turn store — is defined as a trait here. Implementations live
//! in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with stub backends and in-memory stores
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod inference;
pub mod prompt;
pub mod store;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use error::{Error, InferenceError, Result, StoreError};
pub use inference::{GenerationParams, InferenceBackend, TokenEstimator};
pub use prompt::{MarkupFamily, Prompt, PromptBlock, Role};
pub use store::{NewTurn, TurnStore};
pub use turn::{ConversationTurn, SessionId};
