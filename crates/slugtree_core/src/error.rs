//! Service-level error type.

use crate::config::ConfigError;
use crate::model::change_set::PayloadError;
use crate::model::content::{ContentTypeId, NodeId, SiteId};
use crate::pattern::token::PatternError;
use crate::repo::RepoError;
use crate::service::conflict::SlugConflict;
use thiserror::Error;

pub type SlugResult<T> = Result<T, SlugError>;

/// Errors surfaced by the slug engine.
#[derive(Debug, Error)]
pub enum SlugError {
    /// Synchronous commit refused; nothing was written.
    #[error("slug collision: {} conflicting assignment(s)", conflicts.len())]
    Collision { conflicts: Vec<SlugConflict> },
    #[error(transparent)]
    Repo(RepoError),
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("content node not found: {0}")]
    NodeNotFound(NodeId),
    #[error("site not found: {0}")]
    SiteNotFound(SiteId),
    #[error("content type not found: {0}")]
    ContentTypeNotFound(ContentTypeId),
    #[error("invalid slug `{slug}`: {reason}")]
    InvalidSlug { slug: String, reason: &'static str },
    #[error("slug store lock poisoned")]
    LockPoisoned,
    #[error("node {node_id} does not belong to site {site_id}")]
    ScopeSiteMismatch { node_id: NodeId, site_id: SiteId },
}

impl From<RepoError> for SlugError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NodeNotFound(node_id) => Self::NodeNotFound(node_id),
            RepoError::SiteNotFound(site_id) => Self::SiteNotFound(site_id),
            RepoError::ContentTypeNotFound(type_id) => Self::ContentTypeNotFound(type_id),
            other => Self::Repo(other),
        }
    }
}

impl SlugError {
    /// Stable code for log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Collision { .. } => "slug_collision",
            Self::Repo(_) => "repo_error",
            Self::Pattern(_) => "invalid_pattern",
            Self::Payload(_) => "invalid_payload",
            Self::Config(_) => "invalid_config",
            Self::NodeNotFound(_) => "node_not_found",
            Self::SiteNotFound(_) => "site_not_found",
            Self::ContentTypeNotFound(_) => "content_type_not_found",
            Self::InvalidSlug { .. } => "invalid_slug",
            Self::LockPoisoned => "lock_poisoned",
            Self::ScopeSiteMismatch { .. } => "scope_site_mismatch",
        }
    }
}
