//! URL pattern vocabulary, scope analysis and slug resolution.
//!
//! # Responsibility
//! - Parse patterns written in the fixed token vocabulary.
//! - Decide how far a pattern change reaches in the tree.
//! - Turn a node plus ancestor context into a canonical slug.

pub mod analyzer;
pub mod resolver;
pub mod token;
