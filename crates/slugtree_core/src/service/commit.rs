//! Atomic persistence of arbitrated change-sets.
//!
//! # Invariants
//! - `AbortOnConflict` writes nothing when any conflict exists.
//! - Every write of one commit lands in a single transaction.

use crate::error::{SlugError, SlugResult};
use crate::model::change_set::{ChangeSet, UnresolvedSlug};
use crate::model::slug::{SlugAssignment, SlugWrite};
use crate::repo::slug_repo::SlugRepository;
use crate::service::conflict::{ConflictArbiter, SlugConflict};
use log::{info, warn};

/// Conflict policy of one commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Any conflict fails the whole commit.
    AbortOnConflict,
    /// Conflicting changes are skipped; the rest is written.
    SkipConflicts,
}

/// What one commit wrote and what it had to leave out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub written: usize,
    pub conflicts: Vec<SlugConflict>,
    pub unresolved: Vec<UnresolvedSlug>,
}

impl CommitReport {
    /// True when every change of the commit was applied.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty() && self.unresolved.is_empty()
    }

    /// One-line summary stored on failed queue entries.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        for conflict in &self.conflicts {
            parts.push(format!(
                "collision site={} culture={} slug={} holder={} blocked={}",
                conflict.site_id,
                conflict.culture_code,
                conflict.slug,
                conflict.holder,
                conflict.blocked
            ));
        }
        for item in &self.unresolved {
            parts.push(format!(
                "unresolved node={} culture={}: {}",
                item.node_id, item.culture_code, item.reason
            ));
        }
        format!("written={}; {}", self.written, parts.join("; "))
    }
}

pub struct CommitExecutor<'a, S: SlugRepository> {
    slugs: &'a S,
}

impl<'a, S: SlugRepository> CommitExecutor<'a, S> {
    pub fn new(slugs: &'a S) -> Self {
        Self { slugs }
    }

    /// Arbitrates and writes every pending change of `change_sets`.
    pub fn commit(
        &self,
        change_sets: &mut [ChangeSet],
        mode: CommitMode,
    ) -> SlugResult<CommitReport> {
        let arbiter = ConflictArbiter::new(self.slugs);
        let mut report = CommitReport::default();
        for change_set in change_sets.iter_mut() {
            report
                .conflicts
                .extend(arbiter.arbitrate(change_set)?.into_conflicts());
            report.unresolved.extend(change_set.unresolved());
        }

        if mode == CommitMode::AbortOnConflict && !report.conflicts.is_empty() {
            warn!(
                "event=slug_commit module=service status=error error_code=slug_collision conflicts={}",
                report.conflicts.len()
            );
            return Err(SlugError::Collision {
                conflicts: report.conflicts,
            });
        }

        let writes: Vec<SlugWrite> = change_sets
            .iter()
            .flat_map(|change_set| {
                let site_id = change_set.site_id();
                change_set.pending().filter_map(move |pending| {
                    let slug = pending.change.new_slug.clone()?;
                    Some(SlugWrite::Upsert(SlugAssignment {
                        site_id,
                        culture_code: pending.change.culture_code.clone(),
                        node_id: pending.node_id,
                        slug,
                        is_custom: false,
                    }))
                })
            })
            .collect();

        report.written = self.slugs.apply_writes(&writes)?;
        info!(
            "event=slug_commit module=service status=ok mode={mode:?} written={} conflicts={} unresolved={}",
            report.written,
            report.conflicts.len(),
            report.unresolved.len()
        );
        Ok(report)
    }
}
