//! SQLite persistence for Chatbox conversation turns.
//!
//! One implementation of [`chatbox_core::TurnStore`]: a single `chatbox`
//! table of append-only turns, indexed by session. Pass `sqlite::memory:`
//! for an ephemeral in-process database in tests.

pub mod sqlite;

pub use sqlite::SqliteTurnStore;
