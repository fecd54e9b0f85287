//! Slug maintenance entry points for the content host.
//!
//! # Responsibility
//! - Turn host triggers (node saves, pattern edits, site rebuilds) into
//!   change-sets and commit them immediately or through the queue.
//! - Pin and unpin custom slugs.
//! - Expose queue administration for operators.
//!
//! # Invariants
//! - Every entry point checks the `OperationContext` first; a repeated
//!   `(operation, entity)` pair returns without touching the store.
//! - The store lock is released before the queue chain is triggered.

use crate::config::SlugConfig;
use crate::context::{GuardEntity, OperationContext, OperationKind};
use crate::db::{open_db, open_db_in_memory};
use crate::error::{SlugError, SlugResult};
use crate::model::change_set::ChangeSet;
use crate::model::content::{ContentType, ContentTypeId, NodeId};
use crate::model::queue::{EntryId, QueueEntry};
use crate::model::slug::{SlugAssignment, SlugWrite};
use crate::pattern::analyzer::PatternAnalyzer;
use crate::pattern::resolver::{normalize_slug, SlugResolver};
use crate::repo::content_repo::{ContentRepository, SqliteContentRepository};
use crate::repo::queue_repo::{QueueRepository, SqliteQueueRepository};
use crate::repo::slug_repo::{SlugRepository, SqliteSlugRepository};
use crate::repo::RepoError;
use crate::service::commit::{CommitExecutor, CommitMode, CommitReport};
use crate::service::conflict::SlugConflict;
use crate::service::queue_runner::QueueRunner;
use crate::service::tree_diff::{RebuildTarget, TreeDiffBuilder};
use log::{info, warn};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// One rebuild trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildRequest {
    pub target: RebuildTarget,
    /// Commit on the caller's thread instead of queueing.
    pub immediate: bool,
    pub overwrite_custom: bool,
}

impl RebuildRequest {
    pub fn immediate(target: RebuildTarget) -> Self {
        Self {
            target,
            immediate: true,
            overwrite_custom: false,
        }
    }

    pub fn queued(target: RebuildTarget) -> Self {
        Self {
            target,
            immediate: false,
            overwrite_custom: false,
        }
    }

    pub fn overwriting_custom(mut self) -> Self {
        self.overwrite_custom = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// The same operation already ran for this entity in the given context.
    AlreadyHandled,
    /// Every slug in scope already matches its pattern.
    NoChanges,
    Committed(CommitReport),
    Queued { entry_ids: Vec<EntryId> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinOutcome {
    AlreadyHandled,
    Pinned {
        slug: String,
        /// Nodes whose generated slug was removed to make room.
        displaced: Vec<NodeId>,
    },
}

/// Shared entry point owning the store connection and the queue runner.
pub struct SlugEngine {
    conn: Arc<Mutex<Connection>>,
    config: SlugConfig,
    analyzer: Arc<PatternAnalyzer>,
    runner: Arc<QueueRunner>,
}

impl SlugEngine {
    /// Wraps a connection already migrated to the latest schema.
    pub fn new(conn: Connection, config: SlugConfig) -> Self {
        let conn = Arc::new(Mutex::new(conn));
        let analyzer = Arc::new(PatternAnalyzer::new(config.pattern_cache_ttl()));
        let runner = Arc::new(QueueRunner::new(
            Arc::clone(&conn),
            Arc::clone(&analyzer),
            config.application_id(),
        ));
        Self {
            conn,
            config,
            analyzer,
            runner,
        }
    }

    pub fn open(path: impl AsRef<Path>, config: SlugConfig) -> SlugResult<Self> {
        let conn = open_db(path).map_err(RepoError::from)?;
        Ok(Self::new(conn, config))
    }

    pub fn open_in_memory(config: SlugConfig) -> SlugResult<Self> {
        let conn = open_db_in_memory().map_err(RepoError::from)?;
        Ok(Self::new(conn, config))
    }

    pub fn config(&self) -> &SlugConfig {
        &self.config
    }

    pub fn analyzer(&self) -> &PatternAnalyzer {
        &self.analyzer
    }

    pub fn runner(&self) -> &Arc<QueueRunner> {
        &self.runner
    }

    /// Runs `f` against the content repository under the store lock.
    pub fn content<T>(
        &self,
        f: impl FnOnce(&SqliteContentRepository<'_>) -> SlugResult<T>,
    ) -> SlugResult<T> {
        let conn = self.lock()?;
        let repo = SqliteContentRepository::try_new(&conn)?;
        f(&repo)
    }

    pub fn slugs<T>(
        &self,
        f: impl FnOnce(&SqliteSlugRepository<'_>) -> SlugResult<T>,
    ) -> SlugResult<T> {
        let conn = self.lock()?;
        let repo = SqliteSlugRepository::try_new(&conn)?;
        f(&repo)
    }

    pub fn queue<T>(
        &self,
        f: impl FnOnce(&SqliteQueueRepository<'_>) -> SlugResult<T>,
    ) -> SlugResult<T> {
        let conn = self.lock()?;
        let repo = SqliteQueueRepository::try_new(&conn)?;
        f(&repo)
    }

    /// Rebuilds the slugs in scope of `request.target`.
    pub fn rebuild_scope(
        &self,
        ctx: &mut OperationContext,
        request: RebuildRequest,
    ) -> SlugResult<RebuildOutcome> {
        let outcome = {
            let conn = self.lock()?;
            self.rebuild_guarded(&conn, ctx, request)?
        };
        Ok(self.finish_rebuild(request, outcome))
    }

    /// Creates a content type after validating its pattern.
    pub fn create_content_type(
        &self,
        code_name: &str,
        url_pattern: &str,
    ) -> SlugResult<ContentType> {
        let url_pattern = url_pattern.trim();
        SlugResolver::compile(url_pattern)?;
        let content_type =
            self.content(|repo| Ok(repo.create_content_type(code_name, url_pattern)?))?;
        self.analyzer.invalidate_all();
        info!(
            "event=content_type_create module=service status=ok type_id={}",
            content_type.type_id
        );
        Ok(content_type)
    }

    /// Validates and stores a URL pattern, then rebuilds every node of the type.
    ///
    /// When the rebuild fails the previous pattern is restored.
    pub fn set_url_pattern(
        &self,
        ctx: &mut OperationContext,
        type_id: ContentTypeId,
        pattern: &str,
        immediate: bool,
    ) -> SlugResult<RebuildOutcome> {
        if !ctx.enter(OperationKind::PatternChange, GuardEntity::ContentType(type_id)) {
            return Ok(RebuildOutcome::AlreadyHandled);
        }

        let pattern = pattern.trim();
        SlugResolver::compile(pattern)?;
        let request = request_for(RebuildTarget::ContentType(type_id), immediate);

        let outcome = {
            let conn = self.lock()?;
            let content = SqliteContentRepository::try_new(&conn)?;
            let previous = content
                .get_content_type(type_id)?
                .ok_or(SlugError::ContentTypeNotFound(type_id))?
                .url_pattern;
            content.update_url_pattern(type_id, pattern)?;
            self.analyzer.invalidate_all();
            info!("event=url_pattern_update module=service status=ok type_id={type_id}");

            match self.rebuild_guarded(&conn, ctx, request) {
                Ok(outcome) => outcome,
                Err(err) => {
                    content.update_url_pattern(type_id, &previous)?;
                    self.analyzer.invalidate_all();
                    warn!(
                        "event=url_pattern_update module=service status=error type_id={type_id} error_code={} restored=true",
                        err.code()
                    );
                    return Err(err);
                }
            }
        };
        Ok(self.finish_rebuild(request, outcome))
    }

    /// Pins `slug` on one node and culture.
    ///
    /// A custom holder of the same slug fails with `Collision`; generated
    /// holders lose their assignment in the same transaction.
    pub fn pin_custom_slug(
        &self,
        ctx: &mut OperationContext,
        node_id: NodeId,
        culture_code: &str,
        slug: &str,
    ) -> SlugResult<PinOutcome> {
        if !ctx.enter(
            OperationKind::PinSlug,
            GuardEntity::NodeCulture(node_id, culture_code.to_string()),
        ) {
            return Ok(PinOutcome::AlreadyHandled);
        }
        if slug.trim().is_empty() {
            return Err(SlugError::InvalidSlug {
                slug: slug.to_string(),
                reason: "slug must not be blank",
            });
        }
        let slug = normalize_slug(slug);

        let conn = self.lock()?;
        let content = SqliteContentRepository::try_new(&conn)?;
        let slugs = SqliteSlugRepository::try_new(&conn)?;

        let node = content
            .get_node(node_id)?
            .ok_or(SlugError::NodeNotFound(node_id))?;
        let site = content
            .get_site(node.site_id)?
            .ok_or(SlugError::SiteNotFound(node.site_id))?;
        if !site.cultures.iter().any(|culture| culture == culture_code) {
            return Err(SlugError::InvalidSlug {
                slug,
                reason: "culture is not enabled on the node's site",
            });
        }

        let holders: Vec<SlugAssignment> = slugs
            .find_holders(site.site_id, culture_code, &slug)?
            .into_iter()
            .filter(|holder| holder.node_id != node_id)
            .collect();
        let custom_holders: Vec<SlugConflict> = holders
            .iter()
            .filter(|holder| holder.is_custom)
            .map(|holder| SlugConflict {
                site_id: site.site_id,
                culture_code: culture_code.to_string(),
                slug: slug.clone(),
                holder: holder.node_id,
                blocked: node_id,
                holder_is_custom: true,
            })
            .collect();
        if !custom_holders.is_empty() {
            return Err(SlugError::Collision {
                conflicts: custom_holders,
            });
        }

        let displaced: Vec<NodeId> = holders.iter().map(|holder| holder.node_id).collect();
        let mut writes: Vec<SlugWrite> = displaced
            .iter()
            .map(|&holder| SlugWrite::Remove {
                node_id: holder,
                culture_code: culture_code.to_string(),
            })
            .collect();
        writes.push(SlugWrite::Upsert(SlugAssignment {
            site_id: site.site_id,
            culture_code: culture_code.to_string(),
            node_id,
            slug: slug.clone(),
            is_custom: true,
        }));
        slugs.apply_writes(&writes)?;

        info!(
            "event=slug_pin module=service status=ok node_id={node_id} culture={culture_code} displaced={}",
            displaced.len()
        );
        Ok(PinOutcome::Pinned { slug, displaced })
    }

    /// Unpins one node and culture, then regenerates it from its pattern.
    ///
    /// When the rebuild fails the slug stays pinned.
    pub fn clear_custom_slug(
        &self,
        ctx: &mut OperationContext,
        node_id: NodeId,
        culture_code: &str,
        immediate: bool,
    ) -> SlugResult<RebuildOutcome> {
        if !ctx.enter(
            OperationKind::ClearSlug,
            GuardEntity::NodeCulture(node_id, culture_code.to_string()),
        ) {
            return Ok(RebuildOutcome::AlreadyHandled);
        }
        let request = request_for(RebuildTarget::Node(node_id), immediate);

        let outcome = {
            let conn = self.lock()?;
            let slugs = SqliteSlugRepository::try_new(&conn)?;
            let pinned = slugs
                .get_assignment(node_id, culture_code)?
                .filter(|assignment| assignment.is_custom);
            if let Some(assignment) = &pinned {
                // Keeps serving the pinned text as generated until the rebuild lands.
                slugs.apply_writes(&[SlugWrite::Upsert(SlugAssignment {
                    is_custom: false,
                    ..assignment.clone()
                })])?;
            }
            info!("event=slug_unpin module=service status=ok node_id={node_id} culture={culture_code}");

            match self.rebuild_guarded(&conn, ctx, request) {
                Ok(outcome) => outcome,
                Err(err) => {
                    if let Some(assignment) = pinned {
                        slugs.apply_writes(&[SlugWrite::Upsert(assignment)])?;
                    }
                    warn!(
                        "event=slug_unpin module=service status=error node_id={node_id} culture={culture_code} error_code={} restored=true",
                        err.code()
                    );
                    return Err(err);
                }
            }
        };
        Ok(self.finish_rebuild(request, outcome))
    }

    pub fn queue_entries(&self) -> SlugResult<Vec<QueueEntry>> {
        self.queue(|repo| Ok(repo.list_entries()?))
    }

    /// Requeues one failed entry and wakes the chain.
    pub fn retry_entry(&self, entry_id: EntryId) -> SlugResult<()> {
        self.queue(|repo| Ok(repo.requeue_failed(entry_id)?))?;
        info!("event=queue_retry module=service status=ok entry_id={entry_id}");
        self.runner.trigger();
        Ok(())
    }

    /// Requeues every failed entry and wakes the chain.
    pub fn retry_all_failed(&self) -> SlugResult<usize> {
        let requeued = self.queue(|repo| Ok(repo.requeue_all_failed()?))?;
        info!("event=queue_retry module=service status=ok requeued={requeued}");
        if requeued > 0 {
            self.runner.trigger();
        }
        Ok(requeued)
    }

    /// Guard check plus rebuild on a connection the caller already locked.
    fn rebuild_guarded(
        &self,
        conn: &Connection,
        ctx: &mut OperationContext,
        request: RebuildRequest,
    ) -> SlugResult<RebuildOutcome> {
        let entity = match request.target {
            RebuildTarget::Node(node_id) => GuardEntity::Node(node_id),
            RebuildTarget::ContentType(type_id) => GuardEntity::ContentType(type_id),
            RebuildTarget::Site(site_id) => GuardEntity::Site(site_id),
        };
        if !ctx.enter(OperationKind::Rebuild, entity) {
            info!(
                "event=slug_rebuild module=service status=skip reason=already_handled target={:?}",
                request.target
            );
            return Ok(RebuildOutcome::AlreadyHandled);
        }

        info!(
            "event=slug_rebuild module=service status=start target={:?} immediate={}",
            request.target, request.immediate
        );
        self.rebuild_locked(conn, request)
    }

    /// Wakes the queue chain for queued outcomes; the store lock must be released.
    fn finish_rebuild(
        &self,
        request: RebuildRequest,
        outcome: RebuildOutcome,
    ) -> RebuildOutcome {
        if let RebuildOutcome::Queued { .. } = outcome {
            self.runner.trigger();
        }
        info!(
            "event=slug_rebuild module=service status=ok target={:?} outcome={}",
            request.target,
            outcome_label(&outcome)
        );
        outcome
    }

    fn rebuild_locked(
        &self,
        conn: &Connection,
        request: RebuildRequest,
    ) -> SlugResult<RebuildOutcome> {
        let content = SqliteContentRepository::try_new(conn)?;
        let slugs = SqliteSlugRepository::try_new(conn)?;
        let mut builder = TreeDiffBuilder::new(&content, &slugs, &self.analyzer);

        let mut change_sets = Vec::new();
        for scope in builder.plan(request.target, request.overwrite_custom)? {
            let change_set = builder.build(scope)?;
            if needs_commit(&change_set) {
                change_sets.push(change_set);
            }
        }
        if change_sets.is_empty() {
            return Ok(RebuildOutcome::NoChanges);
        }

        if request.immediate {
            let mode = if self.config.abort_on_conflict() {
                CommitMode::AbortOnConflict
            } else {
                CommitMode::SkipConflicts
            };
            let report = CommitExecutor::new(&slugs).commit(&mut change_sets, mode)?;
            return Ok(RebuildOutcome::Committed(report));
        }

        let queue = SqliteQueueRepository::try_new(conn)?;
        let mut entry_ids = Vec::with_capacity(change_sets.len());
        for change_set in &change_sets {
            entry_ids.push(queue.enqueue(&change_set.to_payload()?)?);
        }
        Ok(RebuildOutcome::Queued { entry_ids })
    }

    fn lock(&self) -> SlugResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| SlugError::LockPoisoned)
    }
}

fn request_for(target: RebuildTarget, immediate: bool) -> RebuildRequest {
    if immediate {
        RebuildRequest::immediate(target)
    } else {
        RebuildRequest::queued(target)
    }
}

fn needs_commit(change_set: &ChangeSet) -> bool {
    change_set.has_pending() || !change_set.unresolved().is_empty()
}

fn outcome_label(outcome: &RebuildOutcome) -> &'static str {
    match outcome {
        RebuildOutcome::AlreadyHandled => "already_handled",
        RebuildOutcome::NoChanges => "no_changes",
        RebuildOutcome::Committed(_) => "committed",
        RebuildOutcome::Queued { .. } => "queued",
    }
}
