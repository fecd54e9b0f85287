//! Scoped subtree diff between candidate and stored slugs.
//!
//! # Responsibility
//! - Plan rebuild scopes for node, content-type and site targets from the
//!   combined scope flags of all content types.
//! - Walk the scoped subtree and record one `SlugChange` per node and culture.
//! - Re-resolve a previously captured change-set against current data.
//!
//! # Invariants
//! - A node is visited at most once per build.
//! - Siblings are evaluated at the parent level before any of them descends.
//! - Stored custom slugs are left alone unless the scope overwrites them.
//! - Ancestor context is memoized per `(node, culture)` for one run only.

use crate::error::{SlugError, SlugResult};
use crate::model::change_set::{ChangeSet, RebuildScope, SlugChange, SlugStatus};
use crate::model::content::{ContentNode, ContentTypeId, NodeId, Site, SiteId};
use crate::pattern::analyzer::{PatternAnalyzer, ScopeFlags};
use crate::pattern::resolver::{name_path, AncestorContext, SlugResolver};
use crate::repo::content_repo::ContentRepository;
use crate::repo::slug_repo::SlugRepository;
use log::debug;
use std::collections::{BTreeMap, HashMap, HashSet};

/// What a rebuild request starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildTarget {
    Node(NodeId),
    ContentType(ContentTypeId),
    Site(SiteId),
}

/// Builds change-sets for one run.
pub struct TreeDiffBuilder<'a, C: ContentRepository, S: SlugRepository> {
    content: &'a C,
    slugs: &'a S,
    analyzer: &'a PatternAnalyzer,
    resolvers: HashMap<ContentTypeId, Result<SlugResolver, String>>,
    contexts: HashMap<(NodeId, String), AncestorContext>,
    default_culture: Option<String>,
}

impl<'a, C: ContentRepository, S: SlugRepository> TreeDiffBuilder<'a, C, S> {
    pub fn new(content: &'a C, slugs: &'a S, analyzer: &'a PatternAnalyzer) -> Self {
        Self {
            content,
            slugs,
            analyzer,
            resolvers: HashMap::new(),
            contexts: HashMap::new(),
            default_culture: None,
        }
    }

    /// Computes the walk definitions of a target, one per affected site.
    pub fn plan(
        &self,
        target: RebuildTarget,
        overwrite_custom: bool,
    ) -> SlugResult<Vec<RebuildScope>> {
        match target {
            RebuildTarget::Node(node_id) => {
                let node = self
                    .content
                    .get_node(node_id)?
                    .ok_or(SlugError::NodeNotFound(node_id))?;
                let site = self.load_site(node.site_id)?;
                Ok(vec![RebuildScope {
                    site_id: site.site_id,
                    roots: vec![node_id],
                    cultures: site_cultures(&site),
                    flags: self.combined_flags()?,
                    full_tree: false,
                    overwrite_custom,
                }])
            }
            RebuildTarget::ContentType(type_id) => {
                if self.content.get_content_type(type_id)?.is_none() {
                    return Err(SlugError::ContentTypeNotFound(type_id));
                }
                let flags = self.combined_flags()?;
                let mut roots_by_site: BTreeMap<SiteId, Vec<NodeId>> = BTreeMap::new();
                for node in self.content.list_nodes_of_type(type_id)? {
                    roots_by_site
                        .entry(node.site_id)
                        .or_default()
                        .push(node.node_id);
                }

                let mut scopes = Vec::with_capacity(roots_by_site.len());
                for (site_id, roots) in roots_by_site {
                    let site = self.load_site(site_id)?;
                    scopes.push(RebuildScope {
                        site_id,
                        roots,
                        cultures: site_cultures(&site),
                        flags,
                        full_tree: false,
                        overwrite_custom,
                    });
                }
                Ok(scopes)
            }
            RebuildTarget::Site(site_id) => {
                let site = self.load_site(site_id)?;
                let roots = self
                    .content
                    .list_children(site_id, None)?
                    .into_iter()
                    .map(|node| node.node_id)
                    .collect();
                Ok(vec![RebuildScope {
                    site_id,
                    roots,
                    cultures: site_cultures(&site),
                    flags: ScopeFlags::ALL,
                    full_tree: true,
                    overwrite_custom,
                }])
            }
        }
    }

    /// Walks `scope` and records candidate slugs against stored ones.
    pub fn build(&mut self, scope: RebuildScope) -> SlugResult<ChangeSet> {
        self.begin_run(scope.site_id)?;
        let mut change_set = ChangeSet::new(scope.clone());
        let mut visited = HashSet::new();

        for &root_id in &scope.roots {
            if visited.contains(&root_id) {
                continue;
            }
            let root = self
                .content
                .get_node(root_id)?
                .ok_or(SlugError::NodeNotFound(root_id))?;
            if root.site_id != scope.site_id {
                return Err(SlugError::ScopeSiteMismatch {
                    node_id: root_id,
                    site_id: scope.site_id,
                });
            }

            let group = if scope.flags.affects_siblings {
                self.content.list_children(scope.site_id, root.parent_id)?
            } else {
                vec![root]
            };
            let first = scope.full_tree.then_some(root_id);
            self.walk(&mut change_set, &mut visited, group, None, first)?;
        }

        debug!(
            "event=tree_diff module=service status=ok site_id={} nodes={} pending={}",
            scope.site_id,
            change_set.len(),
            change_set.pending_count()
        );
        Ok(change_set)
    }

    /// Re-resolves exactly the nodes of `previous` against current data.
    ///
    /// Nodes deleted or moved to another site since capture are dropped; their
    /// children re-attach to the nearest surviving ancestor.
    pub fn refresh(&mut self, previous: &ChangeSet) -> SlugResult<ChangeSet> {
        let scope = previous.scope().clone();
        self.begin_run(scope.site_id)?;
        let mut change_set = ChangeSet::new(scope.clone());
        let mut index_map: Vec<Option<usize>> = Vec::with_capacity(previous.len());

        for captured in previous.nodes() {
            let parent = captured
                .parent
                .and_then(|old| nearest_surviving(previous, old, &index_map));
            let node = match self.content.get_node(captured.node_id)? {
                Some(node) if node.site_id == scope.site_id => node,
                _ => {
                    index_map.push(None);
                    continue;
                }
            };
            let index = change_set.push_node(node.node_id, parent);
            self.evaluate(&mut change_set, index, &node)?;
            index_map.push(Some(index));
        }

        debug!(
            "event=tree_diff_refresh module=service status=ok site_id={} captured={} nodes={} pending={}",
            scope.site_id,
            previous.len(),
            change_set.len(),
            change_set.pending_count()
        );
        Ok(change_set)
    }

    fn begin_run(&mut self, site_id: SiteId) -> SlugResult<()> {
        let site = self.load_site(site_id)?;
        self.default_culture = site.default_culture;
        self.contexts.clear();
        self.resolvers.clear();
        Ok(())
    }

    fn walk(
        &mut self,
        change_set: &mut ChangeSet,
        visited: &mut HashSet<NodeId>,
        nodes: Vec<ContentNode>,
        parent_index: Option<usize>,
        first: Option<NodeId>,
    ) -> SlugResult<()> {
        let mut entered = Vec::with_capacity(nodes.len());
        for node in nodes {
            if !visited.insert(node.node_id) {
                continue;
            }
            let index = change_set.push_node(node.node_id, parent_index);
            self.evaluate(change_set, index, &node)?;
            entered.push((index, node));
        }

        let flags = change_set.scope().flags;
        for (index, node) in entered {
            let dirty = change_set.nodes()[index].dirty;
            let descend = flags.affects_descendants
                || (flags.affects_children && dirty)
                || first == Some(node.node_id);
            if !descend {
                continue;
            }
            let children = self
                .content
                .list_children(node.site_id, Some(node.node_id))?;
            if !children.is_empty() {
                self.walk(change_set, visited, children, Some(index), None)?;
            }
        }
        Ok(())
    }

    fn evaluate(
        &mut self,
        change_set: &mut ChangeSet,
        index: usize,
        node: &ContentNode,
    ) -> SlugResult<()> {
        let cultures = change_set.scope().cultures.clone();
        let overwrite_custom = change_set.scope().overwrite_custom;

        for culture in &cultures {
            let parent = self.parent_context(node, culture)?;
            let stored = self.slugs.get_assignment(node.node_id, culture)?;
            let stored_slug = stored.as_ref().map(|assignment| assignment.slug.clone());

            let pinned = stored.as_ref().is_some_and(|assignment| assignment.is_custom);

            let change = match self.resolver_for(node.type_id)? {
                Ok(resolver) if resolver.is_empty() => None,
                _ if pinned && !overwrite_custom => Some(SlugChange {
                    culture_code: culture.clone(),
                    old_slug: stored_slug.clone(),
                    new_slug: stored_slug.clone(),
                    status: SlugStatus::Custom,
                }),
                Err(reason) => Some(SlugChange {
                    culture_code: culture.clone(),
                    old_slug: stored_slug.clone(),
                    new_slug: None,
                    status: SlugStatus::Unresolved { reason },
                }),
                Ok(resolver) => {
                    let resolved = resolver.resolve(
                        node,
                        culture,
                        self.default_culture.as_deref(),
                        parent.as_ref(),
                    );
                    Some(match resolved {
                        Ok(candidate) => {
                            // Overwriting a pinned slug with the same text still unpins it.
                            let status = if stored_slug.as_deref() == Some(candidate.as_str())
                                && !pinned
                            {
                                SlugStatus::Unchanged
                            } else {
                                SlugStatus::Pending
                            };
                            SlugChange {
                                culture_code: culture.clone(),
                                old_slug: stored_slug.clone(),
                                new_slug: Some(candidate),
                                status,
                            }
                        }
                        Err(err) => SlugChange {
                            culture_code: culture.clone(),
                            old_slug: stored_slug.clone(),
                            new_slug: None,
                            status: SlugStatus::Unresolved {
                                reason: err.to_string(),
                            },
                        },
                    })
                }
            };

            let slug = match &change {
                Some(change) => change.effective_slug().map(str::to_string),
                None => stored_slug,
            };
            let context = AncestorContext {
                slug,
                name_path: name_path(
                    node,
                    culture,
                    self.default_culture.as_deref(),
                    parent.as_ref(),
                ),
            };
            self.contexts
                .insert((node.node_id, culture.clone()), context);

            if let Some(change) = change {
                change_set.record(index, change);
            }
        }
        Ok(())
    }

    /// Context of the parent: this run's result when visited, else stored data.
    fn parent_context(
        &mut self,
        node: &ContentNode,
        culture: &str,
    ) -> SlugResult<Option<AncestorContext>> {
        match node.parent_id {
            None => Ok(None),
            Some(parent_id) => self.context_of(parent_id, culture).map(Some),
        }
    }

    fn context_of(&mut self, node_id: NodeId, culture: &str) -> SlugResult<AncestorContext> {
        if let Some(context) = self.contexts.get(&(node_id, culture.to_string())) {
            return Ok(context.clone());
        }

        let node = self
            .content
            .get_node(node_id)?
            .ok_or(SlugError::NodeNotFound(node_id))?;
        let parent = self.parent_context(&node, culture)?;
        let context = AncestorContext {
            slug: self
                .slugs
                .get_assignment(node_id, culture)?
                .map(|assignment| assignment.slug),
            name_path: name_path(
                &node,
                culture,
                self.default_culture.as_deref(),
                parent.as_ref(),
            ),
        };
        self.contexts
            .insert((node_id, culture.to_string()), context.clone());
        Ok(context)
    }

    fn resolver_for(
        &mut self,
        type_id: ContentTypeId,
    ) -> SlugResult<Result<SlugResolver, String>> {
        if let Some(cached) = self.resolvers.get(&type_id) {
            return Ok(cached.clone());
        }
        let content_type = self
            .content
            .get_content_type(type_id)?
            .ok_or(SlugError::ContentTypeNotFound(type_id))?;
        let compiled =
            SlugResolver::compile(&content_type.url_pattern).map_err(|err| err.to_string());
        self.resolvers.insert(type_id, compiled.clone());
        Ok(compiled)
    }

    /// Flags of every content type combined; descendants may use any type.
    fn combined_flags(&self) -> SlugResult<ScopeFlags> {
        self.analyzer.combined_scope(|| {
            Ok(self
                .content
                .list_content_types()?
                .into_iter()
                .map(|content_type| (content_type.type_id, content_type.url_pattern))
                .collect())
        })
    }

    fn load_site(&self, site_id: SiteId) -> SlugResult<Site> {
        self.content
            .get_site(site_id)?
            .ok_or(SlugError::SiteNotFound(site_id))
    }
}

fn site_cultures(site: &Site) -> Vec<String> {
    if site.cultures.is_empty() {
        return site.default_culture.iter().cloned().collect();
    }
    site.cultures.clone()
}

fn nearest_surviving(
    previous: &ChangeSet,
    mut old_index: usize,
    index_map: &[Option<usize>],
) -> Option<usize> {
    loop {
        if let Some(Some(mapped)) = index_map.get(old_index) {
            return Some(*mapped);
        }
        old_index = previous.nodes().get(old_index)?.parent?;
    }
}
