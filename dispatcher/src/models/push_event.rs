//! The validated, immutable view of an inbound push payload.

use serde::Serialize;

/// Kind of ref a push event targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    Branch,
    Tag,
}

/// A push notification that passed validation.
///
/// Only [`crate::services::validator`] produces these from untrusted input,
/// so every `PushEvent` in the system satisfies the validator's rules:
/// non-empty repository name, allow-listed clone URL, and a single-segment
/// branch name free of path separators and shell metacharacters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushEvent {
    repository_name: String,
    clone_url: String,
    git_ref: String,
    branch: String,
    ref_kind: RefKind,
}

impl PushEvent {
    pub(crate) fn new(
        repository_name: String,
        clone_url: String,
        git_ref: String,
        branch: String,
        ref_kind: RefKind,
    ) -> Self {
        Self {
            repository_name,
            clone_url,
            git_ref,
            branch,
            ref_kind,
        }
    }

    pub fn repository_name(&self) -> &str {
        &self.repository_name
    }

    pub fn clone_url(&self) -> &str {
        &self.clone_url
    }

    /// Full ref path, e.g. `refs/heads/main`.
    pub fn git_ref(&self) -> &str {
        &self.git_ref
    }

    /// Final path segment of the ref.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn ref_kind(&self) -> RefKind {
        self.ref_kind
    }
}
