//! Token substitution for one node and culture.
//!
//! # Responsibility
//! - Evaluate a compiled pattern against a node, a culture and its parent context.
//! - Normalize the raw result into a canonical slug.
//!
//! # Invariants
//! - Culture fallback: requested, then site default, then alphabetically first.
//! - Normalized slugs start with `/`, contain no empty segments and are lowercase.

use crate::model::content::{ContentNode, NodeId, NodeVariant};
use crate::pattern::token::{parse_pattern, PatternError, PatternPart, PatternToken};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static DISALLOWED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}_.~-]+").expect("valid slug charset regex"));
static DASH_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-{2,}").expect("valid dash regex"));

/// Errors evaluating a pattern for one node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("node {node_id} has no culture variant to resolve from")]
    NoVariant { node_id: NodeId },
    #[error("token `{{{token}}}` cannot be resolved for node {node_id}")]
    UnresolvedToken { node_id: NodeId, token: String },
}

/// Resolved facts of a node used while resolving its children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AncestorContext {
    /// Slug the node holds after this run (new, pinned or stored).
    pub slug: Option<String>,
    /// `/`-joined document names from the top level down to the node.
    pub name_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Token(PatternToken),
}

/// Compiled URL pattern of one content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlugResolver {
    segments: Vec<Segment>,
}

impl SlugResolver {
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let segments = parse_pattern(pattern.trim())?
            .into_iter()
            .map(|part| match part {
                PatternPart::Literal(text) => Segment::Literal(text.to_string()),
                PatternPart::Token(token) => Segment::Token(token),
            })
            .collect();
        Ok(Self { segments })
    }

    /// True when the content type carries no managed slug.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Resolves the canonical slug of `node` for `culture`.
    pub fn resolve(
        &self,
        node: &ContentNode,
        culture: &str,
        default_culture: Option<&str>,
        parent: Option<&AncestorContext>,
    ) -> Result<String, ResolveError> {
        let variant = node.variant_for(culture, default_culture);
        let mut raw = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => raw.push_str(text),
                Segment::Token(token) => {
                    raw.push_str(&token_value(token, node, variant, parent)?);
                }
            }
        }
        Ok(normalize_slug(&raw))
    }
}

/// Builds the name path of `node` below its parent context.
pub fn name_path(
    node: &ContentNode,
    culture: &str,
    default_culture: Option<&str>,
    parent: Option<&AncestorContext>,
) -> String {
    let name = node
        .variant_for(culture, default_culture)
        .map_or(node.node_alias.as_str(), |variant| {
            variant.document_name.as_str()
        });
    let prefix = parent.map_or("", |context| context.name_path.as_str());
    format!("{}/{}", prefix.trim_end_matches('/'), name)
}

/// Normalizes a raw substituted pattern into a canonical slug.
pub fn normalize_slug(raw: &str) -> String {
    let segments: Vec<String> = raw
        .split('/')
        .filter_map(|segment| {
            let lowered = segment.trim().to_lowercase();
            let replaced = DISALLOWED_RE.replace_all(&lowered, "-");
            let collapsed = DASH_RUN_RE.replace_all(&replaced, "-");
            let cleaned = collapsed.trim_matches('-');
            match cleaned {
                "" | "." | ".." => None,
                other => Some(other.to_string()),
            }
        })
        .collect();
    format!("/{}", segments.join("/"))
}

fn token_value(
    token: &PatternToken,
    node: &ContentNode,
    variant: Option<&NodeVariant>,
    parent: Option<&AncestorContext>,
) -> Result<String, ResolveError> {
    let unresolved = || ResolveError::UnresolvedToken {
        node_id: node.node_id,
        token: token.label(),
    };
    let require_variant = || {
        variant.ok_or(ResolveError::NoVariant {
            node_id: node.node_id,
        })
    };

    let value = match token {
        PatternToken::NodeId => node.node_id.to_string(),
        PatternToken::NodeAlias => node.node_alias.clone(),
        PatternToken::NodeOrder => node.node_order.to_string(),
        PatternToken::NodeLevel => node.node_level.to_string(),
        PatternToken::NodeParentId => node
            .parent_id
            .map(|parent_id| parent_id.to_string())
            .unwrap_or_default(),
        PatternToken::NodeAliasPath => node.alias_path.clone(),
        PatternToken::DocumentName => require_variant()?.document_name.clone(),
        PatternToken::Culture => require_variant()?.culture_code.clone(),
        PatternToken::Field(name) => {
            let value = require_variant()?
                .fields
                .get(name)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .ok_or_else(unresolved)?;
            value.to_string()
        }
        PatternToken::NodeNamePath => {
            let variant = require_variant()?;
            name_path(node, &variant.culture_code, None, parent)
        }
        PatternToken::ParentUrl => match (node.parent_id, parent) {
            (None, _) => String::new(),
            (Some(_), Some(AncestorContext { slug: Some(slug), .. })) => slug.clone(),
            (Some(_), _) => return Err(unresolved()),
        },
    };
    Ok(value)
}
