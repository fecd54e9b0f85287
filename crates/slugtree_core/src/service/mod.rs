//! Slug maintenance services.
//!
//! # Responsibility
//! - Orchestrate repository calls into the diff, arbitration, commit and
//!   queue stages.
//! - Keep the CLI and host integrations decoupled from storage details.

pub mod commit;
pub mod conflict;
pub mod queue_runner;
pub mod slug_engine;
pub mod tree_diff;
