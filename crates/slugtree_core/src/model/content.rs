//! Content tree read models.
//!
//! # Responsibility
//! - Describe sites, content types and content nodes as the slug core sees them.
//! - Apply the culture fallback rule when picking a node variant.
//!
//! # Invariants
//! - `alias_path` always starts with `/` and ends with the node's own alias.
//! - `node_level` is `0` for top-level nodes and parent level + 1 otherwise.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Content node identifier.
pub type NodeId = i64;
/// Site identifier.
pub type SiteId = i64;
/// Content type identifier.
pub type ContentTypeId = i64;

/// Site with its enabled cultures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub site_id: SiteId,
    pub code_name: String,
    /// Preferred fallback culture for nodes missing the requested variant.
    pub default_culture: Option<String>,
    /// Enabled culture codes, sorted ascending.
    pub cultures: Vec<String>,
}

/// Content type owning one URL pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    pub type_id: ContentTypeId,
    pub code_name: String,
    /// Slug pattern. Empty means nodes of this type carry no managed slug.
    pub url_pattern: String,
}

/// One culture-specific variant of a content node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeVariant {
    pub culture_code: String,
    pub document_name: String,
    /// Named field values referenced by `{Field:Name}` tokens.
    pub fields: BTreeMap<String, String>,
}

impl NodeVariant {
    pub fn new(culture_code: impl Into<String>, document_name: impl Into<String>) -> Self {
        Self {
            culture_code: culture_code.into(),
            document_name: document_name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds one named field value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// Content tree node read model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentNode {
    pub node_id: NodeId,
    pub site_id: SiteId,
    /// `None` means top-level node of its site.
    pub parent_id: Option<NodeId>,
    pub type_id: ContentTypeId,
    pub node_alias: String,
    pub alias_path: String,
    /// Ordinal position within the parent.
    pub node_order: i64,
    /// Depth from the site top level.
    pub node_level: i64,
    /// Variants keyed by culture code.
    pub variants: BTreeMap<String, NodeVariant>,
}

impl ContentNode {
    /// Picks the variant used to resolve `culture`.
    ///
    /// Order is a firm contract: exact culture, then the site default
    /// culture, then the alphabetically first available culture.
    pub fn variant_for(&self, culture: &str, default_culture: Option<&str>) -> Option<&NodeVariant> {
        if let Some(variant) = self.variants.get(culture) {
            return Some(variant);
        }
        if let Some(variant) = default_culture.and_then(|code| self.variants.get(code)) {
            return Some(variant);
        }
        self.variants.values().next()
    }
}

/// Input for creating one content node through the host stand-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContentNode {
    pub site_id: SiteId,
    pub parent_id: Option<NodeId>,
    pub type_id: ContentTypeId,
    pub node_alias: String,
}
