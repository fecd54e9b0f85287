//! Slug uniqueness arbitration for one change-set.
//!
//! # Responsibility
//! - Detect pending changes that would duplicate a slug in `(site, culture)`.
//! - Flag blocked changes as collisions so they keep their old slug.
//!
//! # Invariants
//! - A stored holder blocks a change unless it is itself moving in this run.
//! - Among pending changes, the earlier one in arena order wins.
//! - Arbitration repeats until no new change is blocked.

use crate::error::SlugResult;
use crate::model::change_set::{ChangeSet, SlugStatus};
use crate::model::content::{NodeId, SiteId};
use crate::repo::slug_repo::SlugRepository;
use log::debug;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// One blocked change and the assignment that blocked it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlugConflict {
    pub site_id: SiteId,
    pub culture_code: String,
    pub slug: String,
    /// Node that keeps the slug.
    pub holder: NodeId,
    /// Node whose change was skipped.
    pub blocked: NodeId,
    pub holder_is_custom: bool,
}

/// Result of arbitrating one change-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArbiterVerdict {
    NoConflict,
    Conflicts(Vec<SlugConflict>),
}

impl ArbiterVerdict {
    pub fn is_clear(&self) -> bool {
        matches!(self, Self::NoConflict)
    }

    pub fn into_conflicts(self) -> Vec<SlugConflict> {
        match self {
            Self::NoConflict => Vec::new(),
            Self::Conflicts(conflicts) => conflicts,
        }
    }
}

struct Blocked {
    index: usize,
    slot: usize,
    conflict: SlugConflict,
}

pub struct ConflictArbiter<'a, S: SlugRepository> {
    slugs: &'a S,
}

impl<'a, S: SlugRepository> ConflictArbiter<'a, S> {
    pub fn new(slugs: &'a S) -> Self {
        Self { slugs }
    }

    /// Flags every blocked pending change as `Collision` until stable.
    pub fn arbitrate(&self, change_set: &mut ChangeSet) -> SlugResult<ArbiterVerdict> {
        let site_id = change_set.site_id();
        let mut conflicts = Vec::new();
        let mut passes = 0;

        loop {
            passes += 1;
            let blocked = self.pass(change_set, site_id)?;
            if blocked.is_empty() {
                break;
            }
            for item in blocked {
                change_set.set_status(
                    item.index,
                    item.slot,
                    SlugStatus::Collision {
                        holder: item.conflict.holder,
                    },
                );
                conflicts.push(item.conflict);
            }
        }

        debug!(
            "event=slug_arbitrate module=service status=ok site_id={site_id} passes={passes} conflicts={}",
            conflicts.len()
        );
        if conflicts.is_empty() {
            Ok(ArbiterVerdict::NoConflict)
        } else {
            Ok(ArbiterVerdict::Conflicts(conflicts))
        }
    }

    fn pass(&self, change_set: &ChangeSet, site_id: SiteId) -> SlugResult<Vec<Blocked>> {
        let moving: HashSet<(NodeId, &str)> = change_set
            .pending()
            .map(|pending| (pending.node_id, pending.change.culture_code.as_str()))
            .collect();
        let mut claimed: HashMap<(&str, &str), NodeId> = HashMap::new();
        let mut blocked = Vec::new();

        for pending in change_set.pending() {
            let culture = pending.change.culture_code.as_str();
            let Some(slug) = pending.change.new_slug.as_deref() else {
                continue;
            };
            let conflict = |holder: NodeId, holder_is_custom: bool| SlugConflict {
                site_id,
                culture_code: culture.to_string(),
                slug: slug.to_string(),
                holder,
                blocked: pending.node_id,
                holder_is_custom,
            };

            if let Some(&holder) = claimed.get(&(culture, slug)) {
                blocked.push(Blocked {
                    index: pending.index,
                    slot: pending.slot,
                    conflict: conflict(holder, false),
                });
                continue;
            }

            let stored_holder = self
                .slugs
                .find_holders(site_id, culture, slug)?
                .into_iter()
                .find(|holder| {
                    holder.node_id != pending.node_id
                        && !moving.contains(&(holder.node_id, culture))
                });
            if let Some(holder) = stored_holder {
                blocked.push(Blocked {
                    index: pending.index,
                    slot: pending.slot,
                    conflict: conflict(holder.node_id, holder.is_custom),
                });
                continue;
            }

            claimed.insert((culture, slug), pending.node_id);
        }
        Ok(blocked)
    }
}

#[cfg(test)]
mod tests {
    use super::ArbiterVerdict;

    #[test]
    fn verdict_conflicts_default_to_empty() {
        assert!(ArbiterVerdict::NoConflict.is_clear());
        assert!(ArbiterVerdict::NoConflict.into_conflicts().is_empty());
    }
}
