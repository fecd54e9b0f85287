//! Repository layer contracts and SQLite implementations.
//!
//! # Responsibility
//! - Define data access contracts for the content tree, slug assignments and
//!   the regeneration queue.
//! - Isolate SQLite query details from the slug services.
//!
//! # Invariants
//! - Repositories only accept connections migrated to the latest version.
//! - Multi-row writes run inside one immediate transaction.

use crate::db::migrations::{latest_version, schema_version};
use crate::db::DbError;
use crate::model::content::{ContentTypeId, NodeId, SiteId};
use rusqlite::Connection;
use thiserror::Error;

pub mod content_repo;
pub mod queue_repo;
pub mod slug_repo;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error shared by every SQLite repository.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("site not found: {0}")]
    SiteNotFound(SiteId),
    #[error("content type not found: {0}")]
    ContentTypeNotFound(ContentTypeId),
    #[error("content node not found: {0}")]
    NodeNotFound(NodeId),
    #[error("queue entry not found: {0}")]
    EntryNotFound(i64),
    #[error("move would create cycle: node {node_id} under parent {parent_id}")]
    CycleDetected { node_id: NodeId, parent_id: NodeId },
    #[error("node {node_id} belongs to site {actual}, expected site {expected}")]
    SiteMismatch {
        node_id: NodeId,
        expected: SiteId,
        actual: SiteId,
    },
    #[error("repository requires schema version {expected_version}, got {actual_version}")]
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    #[error("repository requires table `{0}`")]
    MissingRequiredTable(&'static str),
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

pub(crate) fn ensure_connection_ready(
    conn: &Connection,
    tables: &[&'static str],
) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = schema_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for &table in tables {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    i64::from(value)
}

pub(crate) fn int_to_bool(value: i64, column: &str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}
