//! Companion memory and conversational generation engine.
//!
//! Gives each user's AI companion continuity across turns: interaction
//! memories are stored as vector embeddings, the most relevant ones are
//! retrieved for each new message under a hybrid score, a
//! personality-consistent prompt is assembled, and response generation is
//! driven (streamed or single-shot) under a per-companion exclusive lock
//! with an exactly-once memory commit on turn completion.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]

/// Companion identity and lifecycle.
pub mod companion;
/// Shared core types: ids, errors, configuration.
pub mod core;
/// Memory persistence and ranked retrieval.
pub mod memory;
/// Prompt assembly.
pub mod prompt;
/// External provider boundaries.
pub mod providers;
/// HTTP server and API routes.
pub mod server;
/// Generation sessions and the coordinator state machine.
pub mod session;
/// Entry helpers to start the engine server.
pub mod start_companion_engine;
