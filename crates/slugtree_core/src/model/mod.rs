//! Domain model for the content tree, slug assignments and change-sets.
//!
//! # Responsibility
//! - Define the read models the slug core consumes from the content host.
//! - Define the persisted slug fact, the ephemeral change-set arena and the
//!   queue entry that carries it between processes.
//!
//! # Invariants
//! - Content nodes are read-only to the slug core.
//! - A slug assignment is unique per `(site, culture, slug)`.

pub mod change_set;
pub mod content;
pub mod queue;
pub mod slug;
