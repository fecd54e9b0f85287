//! Change-set arena produced by the tree diff and consumed by commit.
//!
//! # Responsibility
//! - Mirror the scoped subtree as an index-addressed arena.
//! - Carry old/new slug and status per node and culture.
//! - Define the versioned queue payload schema.
//!
//! # Invariants
//! - A node appears at most once in the arena.
//! - Parents are pushed before their children.
//! - `parent`/`children`/`roots` indices always point inside `nodes`.

use crate::model::content::{NodeId, SiteId};
use crate::pattern::analyzer::ScopeFlags;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Current queue payload schema version.
pub const CHANGE_SET_FORMAT_VERSION: u32 = 1;

/// Errors decoding or encoding a queued change-set.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("change-set payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("change-set payload version {found} is not supported (expected {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("change-set payload is corrupt: {0}")]
    Corrupt(String),
}

/// Walk definition computed once per operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildScope {
    pub site_id: SiteId,
    /// Walk start points, visited in order.
    pub roots: Vec<NodeId>,
    /// Cultures resolved for every visited node.
    pub cultures: Vec<String>,
    pub flags: ScopeFlags,
    /// Descend below the first node regardless of flags.
    pub full_tree: bool,
    /// Regenerate custom slugs as well.
    pub overwrite_custom: bool,
}

/// Outcome of resolving one node in one culture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlugStatus {
    /// Candidate equals the stored slug.
    Unchanged,
    /// Candidate differs and waits for arbitration/commit.
    Pending,
    /// Stored slug is pinned and was left alone.
    Custom,
    /// Pattern could not be evaluated for this node.
    Unresolved { reason: String },
    /// Blocked by another assignment holding the same slug.
    Collision { holder: NodeId },
}

/// Per-culture slug diff entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlugChange {
    pub culture_code: String,
    pub old_slug: Option<String>,
    pub new_slug: Option<String>,
    pub status: SlugStatus,
}

impl SlugChange {
    /// Slug this node holds once the change-set is applied.
    pub fn effective_slug(&self) -> Option<&str> {
        match self.status {
            SlugStatus::Pending => self.new_slug.as_deref(),
            _ => self.old_slug.as_deref(),
        }
    }
}

/// One arena node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNode {
    pub node_id: NodeId,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// At least one culture is pending.
    pub dirty: bool,
    pub slugs: Vec<SlugChange>,
}

/// Borrowed view of one pending change.
#[derive(Debug, Clone, Copy)]
pub struct PendingSlug<'a> {
    pub index: usize,
    pub slot: usize,
    pub node_id: NodeId,
    pub change: &'a SlugChange,
}

/// Node/culture pair whose pattern could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedSlug {
    pub node_id: NodeId,
    pub culture_code: String,
    pub reason: String,
}

/// Ephemeral diff of a scoped subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    version: u32,
    scope: RebuildScope,
    nodes: Vec<ChangeNode>,
    roots: Vec<usize>,
}

impl ChangeSet {
    pub fn new(scope: RebuildScope) -> Self {
        Self {
            version: CHANGE_SET_FORMAT_VERSION,
            scope,
            nodes: Vec::new(),
            roots: Vec::new(),
        }
    }

    pub fn scope(&self) -> &RebuildScope {
        &self.scope
    }

    pub fn site_id(&self) -> SiteId {
        self.scope.site_id
    }

    pub fn nodes(&self) -> &[ChangeNode] {
        &self.nodes
    }

    /// Arena indices of walk roots (including reconciled siblings).
    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find(&self, node_id: NodeId) -> Option<&ChangeNode> {
        self.nodes.iter().find(|node| node.node_id == node_id)
    }

    /// Finds one node/culture entry.
    pub fn slug_change(&self, node_id: NodeId, culture_code: &str) -> Option<&SlugChange> {
        self.find(node_id)?
            .slugs
            .iter()
            .find(|change| change.culture_code == culture_code)
    }

    /// Iterates pending changes in arena order.
    pub fn pending(&self) -> impl Iterator<Item = PendingSlug<'_>> + '_ {
        self.nodes.iter().enumerate().flat_map(|(index, node)| {
            node.slugs
                .iter()
                .enumerate()
                .filter(|(_, change)| change.status == SlugStatus::Pending)
                .map(move |(slot, change)| PendingSlug {
                    index,
                    slot,
                    node_id: node.node_id,
                    change,
                })
        })
    }

    pub fn has_pending(&self) -> bool {
        self.pending().next().is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    pub fn unresolved(&self) -> Vec<UnresolvedSlug> {
        let mut items = Vec::new();
        for node in &self.nodes {
            for change in &node.slugs {
                if let SlugStatus::Unresolved { reason } = &change.status {
                    items.push(UnresolvedSlug {
                        node_id: node.node_id,
                        culture_code: change.culture_code.clone(),
                        reason: reason.clone(),
                    });
                }
            }
        }
        items
    }

    /// Node ids whose assignments the commit would write.
    pub fn dirty_node_ids(&self) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        self.pending()
            .filter(|pending| seen.insert(pending.node_id))
            .map(|pending| pending.node_id)
            .collect()
    }

    pub(crate) fn push_node(&mut self, node_id: NodeId, parent: Option<usize>) -> usize {
        let index = self.nodes.len();
        self.nodes.push(ChangeNode {
            node_id,
            parent,
            children: Vec::new(),
            dirty: false,
            slugs: Vec::new(),
        });
        match parent {
            Some(parent_index) => self.nodes[parent_index].children.push(index),
            None => self.roots.push(index),
        }
        index
    }

    pub(crate) fn record(&mut self, index: usize, change: SlugChange) {
        let node = &mut self.nodes[index];
        if change.status == SlugStatus::Pending {
            node.dirty = true;
        }
        node.slugs.push(change);
    }

    pub(crate) fn set_status(&mut self, index: usize, slot: usize, status: SlugStatus) {
        let node = &mut self.nodes[index];
        node.slugs[slot].status = status;
        node.dirty = node
            .slugs
            .iter()
            .any(|change| change.status == SlugStatus::Pending);
    }

    /// Encodes the change-set as a queue payload.
    pub fn to_payload(&self) -> Result<String, PayloadError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes and validates a queue payload.
    pub fn from_payload(payload: &str) -> Result<Self, PayloadError> {
        let change_set: ChangeSet = serde_json::from_str(payload)?;
        if change_set.version != CHANGE_SET_FORMAT_VERSION {
            return Err(PayloadError::UnsupportedVersion {
                found: change_set.version,
                supported: CHANGE_SET_FORMAT_VERSION,
            });
        }
        change_set.validate_indices()?;
        Ok(change_set)
    }

    fn validate_indices(&self) -> Result<(), PayloadError> {
        let len = self.nodes.len();
        let out_of_range = |index: usize| index >= len;
        if self.roots.iter().copied().any(out_of_range) {
            return Err(PayloadError::Corrupt("root index out of range".to_string()));
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if let Some(parent) = node.parent {
                // Pre-order arena: parents always precede their children.
                if parent >= index {
                    return Err(PayloadError::Corrupt(format!(
                        "node {} has invalid parent index {parent}",
                        node.node_id
                    )));
                }
            }
            if node.children.iter().copied().any(out_of_range) {
                return Err(PayloadError::Corrupt(format!(
                    "node {} has child index out of range",
                    node.node_id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeSet, PayloadError, RebuildScope, SlugChange, SlugStatus};
    use crate::pattern::analyzer::ScopeFlags;

    fn scope() -> RebuildScope {
        RebuildScope {
            site_id: 7,
            roots: vec![10],
            cultures: vec!["en-US".to_string()],
            flags: ScopeFlags::default(),
            full_tree: false,
            overwrite_custom: false,
        }
    }

    fn change(status: SlugStatus) -> SlugChange {
        SlugChange {
            culture_code: "en-US".to_string(),
            old_slug: Some("/old".to_string()),
            new_slug: Some("/new".to_string()),
            status,
        }
    }

    #[test]
    fn push_node_links_children_and_roots() {
        let mut change_set = ChangeSet::new(scope());
        let root = change_set.push_node(10, None);
        let child = change_set.push_node(11, Some(root));

        assert_eq!(change_set.roots(), &[root]);
        assert_eq!(change_set.nodes()[root].children, vec![child]);
        assert_eq!(change_set.nodes()[child].parent, Some(root));
    }

    #[test]
    fn pending_tracks_status_and_dirty_flag() {
        let mut change_set = ChangeSet::new(scope());
        let root = change_set.push_node(10, None);
        change_set.record(root, change(SlugStatus::Pending));
        assert!(change_set.nodes()[root].dirty);
        assert_eq!(change_set.pending_count(), 1);
        assert_eq!(change_set.slug_change(10, "en-US").unwrap().effective_slug(), Some("/new"));

        change_set.set_status(root, 0, SlugStatus::Collision { holder: 3 });
        assert!(!change_set.nodes()[root].dirty);
        assert!(!change_set.has_pending());
        assert_eq!(change_set.slug_change(10, "en-US").unwrap().effective_slug(), Some("/old"));
    }

    #[test]
    fn payload_rejects_unknown_version() {
        let change_set = ChangeSet::new(scope());
        let payload = change_set
            .to_payload()
            .unwrap()
            .replace("\"version\":1", "\"version\":99");

        let err = ChangeSet::from_payload(&payload).unwrap_err();
        assert!(matches!(
            err,
            PayloadError::UnsupportedVersion { found: 99, supported: 1 }
        ));
    }

    #[test]
    fn payload_rejects_dangling_indices() {
        let mut change_set = ChangeSet::new(scope());
        change_set.push_node(10, None);
        let payload = change_set
            .to_payload()
            .unwrap()
            .replace("\"roots\":[0]", "\"roots\":[4]");

        let err = ChangeSet::from_payload(&payload).unwrap_err();
        assert!(matches!(err, PayloadError::Corrupt(_)));
    }
}
