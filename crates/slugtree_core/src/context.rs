//! Re-entrancy guard passed explicitly through engine calls.
//!
//! Host save hooks may call back into the engine while it is already handling
//! the same entity. Callers thread one `OperationContext` through a logical
//! operation; a repeated `(kind, entity)` pair becomes a no-op.

use crate::model::content::{ContentTypeId, NodeId, SiteId};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Rebuild,
    PatternChange,
    PinSlug,
    ClearSlug,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GuardEntity {
    Node(NodeId),
    ContentType(ContentTypeId),
    Site(SiteId),
    NodeCulture(NodeId, String),
}

/// Visited `(operation, entity)` pairs of one logical operation.
#[derive(Debug, Default)]
pub struct OperationContext {
    visited: HashSet<(OperationKind, GuardEntity)>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the pair; returns `false` when it was already handled.
    pub fn enter(&mut self, kind: OperationKind, entity: GuardEntity) -> bool {
        self.visited.insert((kind, entity))
    }

    pub fn is_handled(&self, kind: OperationKind, entity: &GuardEntity) -> bool {
        self.visited.contains(&(kind, entity.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::{GuardEntity, OperationContext, OperationKind};

    #[test]
    fn enter_is_once_per_kind_and_entity() {
        let mut ctx = OperationContext::new();
        assert!(ctx.enter(OperationKind::Rebuild, GuardEntity::Node(1)));
        assert!(!ctx.enter(OperationKind::Rebuild, GuardEntity::Node(1)));
        assert!(ctx.enter(OperationKind::PinSlug, GuardEntity::Node(1)));
        assert!(ctx.is_handled(OperationKind::Rebuild, &GuardEntity::Node(1)));
        assert!(!ctx.is_handled(OperationKind::Rebuild, &GuardEntity::Site(1)));
    }
}
