//! Payload validator. Untrusted push payload in, [`PushEvent`] out.
//!
//! Pure: no I/O, no logging. Callers decide what to do with the error.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::config::ValidatorConfig;
use crate::models::push_event::{PushEvent, RefKind};

const BRANCH_PREFIX: &str = "refs/heads/";
const TAG_PREFIX: &str = "refs/tags/";
const MAX_NAME_LEN: usize = 255;

static BRANCH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("clone URL is not from a trusted source")]
    UntrustedSource,

    #[error("unsupported ref `{0}`")]
    UnsupportedRefKind(String),

    #[error("branch name is not acceptable")]
    InvalidBranch,

    #[error("repository name is not acceptable")]
    InvalidRepositoryName,
}

impl ValidationError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MissingField(_) => "missing_field",
            ValidationError::WrongType { .. } => "wrong_type",
            ValidationError::UntrustedSource => "untrusted_source",
            ValidationError::UnsupportedRefKind(_) => "unsupported_ref_kind",
            ValidationError::InvalidBranch => "invalid_branch",
            ValidationError::InvalidRepositoryName => "invalid_repository_name",
        }
    }

    /// Dotted path of the offending field, if there is one.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ValidationError::MissingField(field) => Some(*field),
            ValidationError::WrongType { field, .. } => Some(*field),
            ValidationError::UntrustedSource => Some("repository.ssh_url"),
            ValidationError::UnsupportedRefKind(_) | ValidationError::InvalidBranch => Some("ref"),
            ValidationError::InvalidRepositoryName => Some("repository.name"),
        }
    }
}

/// Validate a decoded push payload.
pub fn validate(payload: &Value, config: &ValidatorConfig) -> Result<PushEvent, ValidationError> {
    if !payload.is_object() {
        return Err(ValidationError::WrongType {
            field: "$",
            expected: "an object",
        });
    }

    let repository = field(payload, "repository", "repository")?;
    if !repository.is_object() {
        return Err(ValidationError::WrongType {
            field: "repository",
            expected: "an object",
        });
    }
    let name = string_field(repository, "name", "repository.name")?;
    let clone_url = string_field(repository, "ssh_url", "repository.ssh_url")?;
    let git_ref = string_field(payload, "ref", "ref")?;

    if !is_acceptable_repository_name(name) {
        return Err(ValidationError::InvalidRepositoryName);
    }
    if !is_trusted_source(clone_url, config) {
        return Err(ValidationError::UntrustedSource);
    }
    let (branch, ref_kind) = branch_from_ref(git_ref, config.allow_tags)?;

    Ok(PushEvent::new(
        name.to_string(),
        clone_url.to_string(),
        git_ref.to_string(),
        branch.to_string(),
        ref_kind,
    ))
}

fn field<'a>(value: &'a Value, key: &str, path: &'static str) -> Result<&'a Value, ValidationError> {
    match value.get(key) {
        None | Some(Value::Null) => Err(ValidationError::MissingField(path)),
        Some(v) => Ok(v),
    }
}

fn string_field<'a>(
    value: &'a Value,
    key: &str,
    path: &'static str,
) -> Result<&'a str, ValidationError> {
    field(value, key, path)?
        .as_str()
        .ok_or(ValidationError::WrongType {
            field: path,
            expected: "a string",
        })
}

fn is_acceptable_repository_name(name: &str) -> bool {
    !name.trim().is_empty() && name.len() <= MAX_NAME_LEN && !name.chars().any(char::is_control)
}

/// Derive the branch (final `/` segment) from a full ref.
///
/// The part after the prefix must itself be that final segment, so
/// `refs/heads/feature/x` is rejected rather than truncated to `x`.
fn branch_from_ref(git_ref: &str, allow_tags: bool) -> Result<(&str, RefKind), ValidationError> {
    let (rest, kind) = if let Some(rest) = git_ref.strip_prefix(BRANCH_PREFIX) {
        (rest, RefKind::Branch)
    } else if let Some(rest) = git_ref.strip_prefix(TAG_PREFIX).filter(|_| allow_tags) {
        (rest, RefKind::Tag)
    } else {
        return Err(ValidationError::UnsupportedRefKind(git_ref.to_string()));
    };

    let branch = git_ref.rsplit('/').next().unwrap_or_default();
    if branch != rest
        || branch.len() > MAX_NAME_LEN
        || !BRANCH_REGEX.is_match(branch)
        || branch.contains("..")
        || branch.ends_with(".lock")
    {
        return Err(ValidationError::InvalidBranch);
    }
    Ok((branch, kind))
}

fn is_trusted_source(url: &str, config: &ValidatorConfig) -> bool {
    if url.starts_with('-') || url.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return false;
    }
    if !config
        .allowed_sources
        .iter()
        .any(|prefix| url.starts_with(prefix.as_str()))
    {
        return false;
    }
    if config.allowed_hosts.is_empty() {
        return true;
    }
    match clone_url_host(url) {
        Some(host) => config
            .allowed_hosts
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(host)),
        None => false,
    }
}

/// Host part of `ssh://[user@]host[:port]/path` or `user@host:path`.
fn clone_url_host(url: &str) -> Option<&str> {
    let host = if let Some((_, rest)) = url.split_once("://") {
        let authority = rest.split('/').next()?;
        let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
        host_port.split(':').next()?
    } else {
        let (_, rest) = url.split_once('@')?;
        rest.split(':').next()?
    };
    (!host.is_empty()).then_some(host)
}
