//! Hierarchical URL slug maintenance.
//!
//! Content types carry URL patterns; the engine keeps one slug per node and
//! culture consistent with those patterns as nodes move, rename or change
//! type patterns. Small scopes commit on the caller's thread; large ones go
//! through a durable single-flight queue.

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod pattern;
pub mod repo;
pub mod service;

pub use config::{ConfigError, SlugConfig};
pub use context::{GuardEntity, OperationContext, OperationKind};
pub use error::{SlugError, SlugResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::change_set::{ChangeSet, RebuildScope, SlugChange, SlugStatus};
pub use model::content::{ContentNode, ContentType, NewContentNode, NodeVariant, Site};
pub use model::queue::{EntryId, QueueEntry};
pub use model::slug::SlugAssignment;
pub use pattern::analyzer::{PatternAnalyzer, ScopeFlags};
pub use pattern::resolver::{normalize_slug, SlugResolver};
pub use repo::{RepoError, RepoResult};
pub use service::commit::{CommitExecutor, CommitMode, CommitReport};
pub use service::conflict::{ArbiterVerdict, ConflictArbiter, SlugConflict};
pub use service::queue_runner::{DispatchOutcome, QueueRunner};
pub use service::slug_engine::{PinOutcome, RebuildOutcome, RebuildRequest, SlugEngine};
pub use service::tree_diff::{RebuildTarget, TreeDiffBuilder};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
