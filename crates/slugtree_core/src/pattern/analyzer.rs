//! Scope analysis of URL patterns.
//!
//! # Responsibility
//! - Classify which structural tokens a pattern references.
//! - Cache the classification of every content type with a bounded TTL.
//!
//! # Invariants
//! - Any pattern edit invalidates the whole cache (coarse dependency).
//! - Classification is a token scan; unknown tokens do not fail it.

use crate::model::content::ContentTypeId;
use crate::pattern::token::scan_token_names;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// How far a pattern change reaches beyond the node itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeFlags {
    /// Pattern references ordinal position.
    pub affects_siblings: bool,
    /// Pattern references the parent's resolved URL.
    pub affects_children: bool,
    /// Pattern references depth, parent identity, alias path or name path.
    pub affects_descendants: bool,
}

impl ScopeFlags {
    /// Flags used for whole-site rebuilds.
    pub const ALL: Self = Self {
        affects_siblings: true,
        affects_children: true,
        affects_descendants: true,
    };

    /// Classifies a pattern by token scan.
    pub fn from_pattern(pattern: &str) -> Self {
        let mut flags = Self::default();
        for name in scan_token_names(pattern) {
            match name {
                "NodeOrder" => flags.affects_siblings = true,
                "ParentUrl" => flags.affects_children = true,
                "NodeLevel" | "NodeParentID" | "NodeAliasPath" | "NodeNamePath" => {
                    flags.affects_descendants = true
                }
                _ => {}
            }
        }
        flags
    }

    /// True when a rebuild never needs to leave the node itself.
    pub fn is_stable(&self) -> bool {
        !self.affects_siblings && !self.affects_children && !self.affects_descendants
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            affects_siblings: self.affects_siblings || other.affects_siblings,
            affects_children: self.affects_children || other.affects_children,
            affects_descendants: self.affects_descendants || other.affects_descendants,
        }
    }
}

/// Classification of every content type, built and dropped as one unit.
#[derive(Debug)]
struct ScopeCache {
    types: usize,
    combined: ScopeFlags,
    cached_at: Instant,
}

/// Scope cache shared across callers.
///
/// Holds the union of every content type's flags; a node below the trigger
/// may be of any type.
#[derive(Debug)]
pub struct PatternAnalyzer {
    ttl: Duration,
    cache: RwLock<Option<ScopeCache>>,
}

impl PatternAnalyzer {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cache: RwLock::new(None),
        }
    }

    /// Union of the flags of every content type, loading all patterns on miss.
    pub fn combined_scope<E>(
        &self,
        load_patterns: impl FnOnce() -> Result<Vec<(ContentTypeId, String)>, E>,
    ) -> Result<ScopeFlags, E> {
        if let Some(flags) = self.cached() {
            return Ok(flags);
        }

        let patterns = load_patterns()?;
        let types = patterns.len();
        let combined = patterns
            .iter()
            .fold(ScopeFlags::default(), |acc, (_, pattern)| {
                acc.union(ScopeFlags::from_pattern(pattern))
            });
        debug!(
            "event=pattern_scope module=pattern status=miss types={} siblings={} children={} descendants={}",
            types,
            combined.affects_siblings,
            combined.affects_children,
            combined.affects_descendants
        );
        if let Ok(mut cache) = self.cache.write() {
            *cache = Some(ScopeCache {
                types,
                combined,
                cached_at: Instant::now(),
            });
        }
        Ok(combined)
    }

    /// Drops every cached classification.
    pub fn invalidate_all(&self) {
        let mut cache = match self.cache.write() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        let dropped = cache.take().map_or(0, |cache| cache.types);
        debug!("event=pattern_scope module=pattern status=invalidated dropped={dropped}");
    }

    /// Number of content types behind the cached union.
    pub fn cached_len(&self) -> usize {
        self.cache
            .read()
            .map_or(0, |cache| cache.as_ref().map_or(0, |cache| cache.types))
    }

    fn cached(&self) -> Option<ScopeFlags> {
        let cache = self.cache.read().ok()?;
        let cache = cache.as_ref()?;
        if cache.cached_at.elapsed() >= self.ttl {
            return None;
        }
        Some(cache.combined)
    }
}
