//! Persisted slug assignment model.

use crate::model::content::{NodeId, SiteId};

/// The persisted fact `(site, culture, node) -> slug`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlugAssignment {
    pub site_id: SiteId,
    pub culture_code: String,
    pub node_id: NodeId,
    pub slug: String,
    /// Pinned slugs are never regenerated and outrank generated ones.
    pub is_custom: bool,
}

/// One mutation inside an atomic slug commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlugWrite {
    Upsert(SlugAssignment),
    Remove { node_id: NodeId, culture_code: String },
}
