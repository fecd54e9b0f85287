//! Fixed token vocabulary for URL patterns.
//!
//! # Responsibility
//! - Split a pattern into literal text and recognized tokens.
//! - Reject unknown tokens and stray braces at pattern edit time.
//!
//! # Invariants
//! - The vocabulary is closed; there is no user-defined token.
//! - Token names are case-sensitive (`{NodeAliasPath}`, not `{nodealiaspath}`).

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([A-Za-z]+)(?::([^{}]*))?\}").expect("valid pattern token regex")
});

/// Pattern syntax errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("unknown pattern token `{{{0}}}`")]
    UnknownToken(String),
    #[error("pattern token `{{Field:...}}` requires a field name")]
    EmptyFieldName,
    #[error("unbalanced brace in pattern at byte {0}")]
    UnbalancedBrace(usize),
}

/// One recognized pattern token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatternToken {
    NodeId,
    NodeAlias,
    DocumentName,
    Culture,
    Field(String),
    NodeOrder,
    NodeLevel,
    NodeParentId,
    NodeAliasPath,
    NodeNamePath,
    ParentUrl,
}

impl PatternToken {
    fn from_parts(name: &str, argument: Option<&str>) -> Result<Self, PatternError> {
        let token = match name {
            "NodeID" => Self::NodeId,
            "NodeAlias" => Self::NodeAlias,
            "DocumentName" => Self::DocumentName,
            "Culture" => Self::Culture,
            "NodeOrder" => Self::NodeOrder,
            "NodeLevel" => Self::NodeLevel,
            "NodeParentID" => Self::NodeParentId,
            "NodeAliasPath" => Self::NodeAliasPath,
            "NodeNamePath" => Self::NodeNamePath,
            "ParentUrl" => Self::ParentUrl,
            "Field" => {
                let field = argument.map(str::trim).unwrap_or_default();
                if field.is_empty() {
                    return Err(PatternError::EmptyFieldName);
                }
                return Ok(Self::Field(field.to_string()));
            }
            other => return Err(PatternError::UnknownToken(other.to_string())),
        };
        if argument.is_some() {
            return Err(PatternError::UnknownToken(format!("{name}:...")));
        }
        Ok(token)
    }

    /// Display form used in error messages.
    pub fn label(&self) -> String {
        match self {
            Self::NodeId => "NodeID".to_string(),
            Self::NodeAlias => "NodeAlias".to_string(),
            Self::DocumentName => "DocumentName".to_string(),
            Self::Culture => "Culture".to_string(),
            Self::Field(name) => format!("Field:{name}"),
            Self::NodeOrder => "NodeOrder".to_string(),
            Self::NodeLevel => "NodeLevel".to_string(),
            Self::NodeParentId => "NodeParentID".to_string(),
            Self::NodeAliasPath => "NodeAliasPath".to_string(),
            Self::NodeNamePath => "NodeNamePath".to_string(),
            Self::ParentUrl => "ParentUrl".to_string(),
        }
    }
}

/// Pattern piece in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternPart<'a> {
    Literal(&'a str),
    Token(PatternToken),
}

/// Parses a pattern into literal and token parts.
pub fn parse_pattern(pattern: &str) -> Result<Vec<PatternPart<'_>>, PatternError> {
    let mut parts = Vec::new();
    let mut cursor = 0;
    for captures in TOKEN_RE.captures_iter(pattern) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        push_literal(&mut parts, pattern, cursor, whole.start())?;
        let name = captures.get(1).map_or("", |value| value.as_str());
        let argument = captures.get(2).map(|value| value.as_str());
        parts.push(PatternPart::Token(PatternToken::from_parts(name, argument)?));
        cursor = whole.end();
    }
    push_literal(&mut parts, pattern, cursor, pattern.len())?;
    Ok(parts)
}

/// Scans token names without validating them.
///
/// Used by scope analysis, which must not fail on patterns that predate a
/// vocabulary change.
pub fn scan_token_names(pattern: &str) -> impl Iterator<Item = &str> + '_ {
    TOKEN_RE
        .captures_iter(pattern)
        .filter_map(|captures| captures.get(1).map(|name| name.as_str()))
}

fn push_literal<'a>(
    parts: &mut Vec<PatternPart<'a>>,
    pattern: &'a str,
    start: usize,
    end: usize,
) -> Result<(), PatternError> {
    if start >= end {
        return Ok(());
    }
    let literal = &pattern[start..end];
    if let Some(offset) = literal.find(['{', '}']) {
        return Err(PatternError::UnbalancedBrace(start + offset));
    }
    parts.push(PatternPart::Literal(literal));
    Ok(())
}
