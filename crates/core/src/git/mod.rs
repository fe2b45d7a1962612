//! Git operations for tplsync.

pub mod client;
pub mod remote_url;

use std::path::Path;

use crate::errors::GitError;

pub use client::{GitClient, GitCredentials};

/// Raw state of one path between HEAD and the working tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathState {
    Current,
    /// In the working tree but not in HEAD.
    New,
    Modified,
    /// In HEAD but gone from the working tree.
    Deleted,
    Conflicted,
    TypeChanged,
    Renamed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStatus {
    /// Path relative to the tree root, `/`-separated.
    pub path: String,
    pub state: PathState,
}

/// A checked-out, version-controlled tree that the engine exports into and
/// reads desired state from.
pub trait VersionedTreeStore {
    /// Root of the working tree.
    fn workdir(&self) -> &Path;

    /// Id of the commit the tree is checked out at, if any.
    fn head_commit(&self) -> Result<Option<String>, GitError>;

    /// State of every tracked or untracked path, unchanged ones included.
    fn status(&self) -> Result<Vec<PathStatus>, GitError>;

    /// Reset index and working tree to `commit`.
    fn hard_reset(&self, commit: &str) -> Result<(), GitError>;

    /// Stage additions, modifications and deletions.
    fn stage_all(&self) -> Result<(), GitError>;

    /// Commit the index; returns the new commit id.
    fn commit(&self, message: &str) -> Result<String, GitError>;

    fn push(&self) -> Result<(), GitError>;
}
