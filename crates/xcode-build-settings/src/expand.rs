//! Single variable reference expansion
//!
//! Handles values of the form `prefix$(NAME)suffix`, `prefix${NAME}suffix`
//! and `prefix$(NAME:modifier)suffix`. The modifier (e.g. `rfc1034identifier`)
//! is ignored. Only one reference per value is supported; values with more
//! than one reference are rejected instead of being partially expanded.

use crate::settings::{BuildSettings, SettingsError};

/// Errors raised while expanding a variable reference.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpandError {
    #[error("no variable reference found in '{0}'")]
    NoReference(String),

    #[error("unterminated variable reference in '{0}'")]
    Unterminated(String),

    #[error("empty variable name in '{0}'")]
    EmptyName(String),

    #[error("more than one variable reference in '{0}'")]
    MultipleReferences(String),

    #[error("no value for variable {0}")]
    MissingKey(String),

    #[error("value of variable {0} is not a string")]
    NotAString(String),
}

/// A parsed `$(NAME:modifier)` reference with its surrounding literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableReference<'a> {
    pub prefix: &'a str,
    pub name: &'a str,
    pub modifier: Option<&'a str>,
    pub suffix: &'a str,
}

/// Whether `value` contains a `$(` or `${` reference opener.
pub fn contains_reference(value: &str) -> bool {
    find_opener(value).is_some()
}

/// Find the first `$(` / `${` and return its byte offset and closing char.
fn find_opener(value: &str) -> Option<(usize, char)> {
    value.match_indices('$').find_map(|(idx, _)| {
        match value[idx + 1..].chars().next() {
            Some('(') => Some((idx, ')')),
            Some('{') => Some((idx, '}')),
            _ => None,
        }
    })
}

/// Split `value` into prefix, variable name, modifier and suffix.
pub fn parse_reference(value: &str) -> Result<VariableReference<'_>, ExpandError> {
    let (start, close) =
        find_opener(value).ok_or_else(|| ExpandError::NoReference(value.to_string()))?;

    let body_start = start + 2;
    let body_len = value[body_start..]
        .find(close)
        .ok_or_else(|| ExpandError::Unterminated(value.to_string()))?;
    let body = &value[body_start..body_start + body_len];
    let suffix = &value[body_start + body_len + 1..];

    // Catches both nesting ("$(A$(B))") and a second reference in the suffix
    if body.contains('$') || contains_reference(suffix) {
        return Err(ExpandError::MultipleReferences(value.to_string()));
    }

    let (name, modifier) = match body.split_once(':') {
        Some((name, modifier)) => (name, Some(modifier)),
        None => (body, None),
    };

    if name.is_empty() {
        return Err(ExpandError::EmptyName(value.to_string()));
    }

    Ok(VariableReference {
        prefix: &value[..start],
        name,
        modifier,
        suffix,
    })
}

/// Expand the single variable reference in `value` against `settings`.
pub fn expand(value: &str, settings: &BuildSettings) -> Result<String, ExpandError> {
    let reference = parse_reference(value)?;

    let resolved = settings.string(reference.name).map_err(|e| match e {
        SettingsError::NotAString { .. } => ExpandError::NotAString(reference.name.to_string()),
        _ => ExpandError::MissingKey(reference.name.to_string()),
    })?;

    Ok(format!("{}{}{}", reference.prefix, resolved, reference.suffix))
}
