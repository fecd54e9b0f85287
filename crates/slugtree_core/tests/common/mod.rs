#![allow(dead_code)]

use slugtree_core::repo::content_repo::ContentRepository;
use slugtree_core::repo::slug_repo::SlugRepository;
use slugtree_core::{ContentNode, ContentType, NewContentNode, NodeVariant, Site};

pub const EN: &str = "en-US";
pub const DE: &str = "de-DE";

pub fn seed_site(repo: &impl ContentRepository, code_name: &str) -> Site {
    repo.create_site(code_name, Some(EN), &[EN]).unwrap()
}

pub fn seed_type(repo: &impl ContentRepository, code_name: &str, pattern: &str) -> ContentType {
    repo.create_content_type(code_name, pattern).unwrap()
}

/// Creates a node with an `en-US` variant named `name`.
pub fn add_node(
    repo: &impl ContentRepository,
    site: &Site,
    parent: Option<&ContentNode>,
    content_type: &ContentType,
    alias: &str,
    name: &str,
) -> ContentNode {
    let node = repo
        .create_node(&NewContentNode {
            site_id: site.site_id,
            parent_id: parent.map(|parent| parent.node_id),
            type_id: content_type.type_id,
            node_alias: alias.to_string(),
        })
        .unwrap();
    repo.upsert_variant(node.node_id, &NodeVariant::new(EN, name))
        .unwrap();
    repo.get_node(node.node_id).unwrap().unwrap()
}

pub fn slug_of(repo: &impl SlugRepository, node: &ContentNode) -> Option<String> {
    repo.get_assignment(node.node_id, EN)
        .unwrap()
        .map(|assignment| assignment.slug)
}
