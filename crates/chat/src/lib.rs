//! The conversation pipeline: prompt assembly under a context-window
//! budget, model-based condensation, and a binary topical validator.
//!
//! `ChatPipeline` is the orchestrator — one linear state machine per
//! request, no branching back. The condenser and validator are also
//! usable standalone (the gateway exposes them as endpoints).

pub mod condense;
pub mod pipeline;
pub mod validate;

pub use condense::{CondenseMode, Condenser};
pub use pipeline::{ChatOutcome, ChatPipeline};
pub use validate::{Validator, Verdict};
