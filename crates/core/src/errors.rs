//! Error types for the tplsync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`. The sync
//! engine wraps the others in [`SyncError`].

use std::collections::BTreeSet;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from local Git (git2) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// The repository is bare and has no working tree to export into.
    #[error("git repository at '{0}' has no working directory")]
    NoWorkdir(String),

    /// Push was rejected (e.g. non-fast-forward).
    #[error("git push rejected for branch '{branch}': {detail}")]
    PushRejected {
        branch: String,
        detail: String,
    },

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Remote API errors
// ---------------------------------------------------------------------------

/// Errors from the remote template API.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP-level transport error (network, TLS, etc.).
    #[error("remote HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The JSON-RPC endpoint returned an error object.
    #[error("remote API error {code} in '{method}': {message} {data}")]
    ApiError {
        method: String,
        code: i64,
        message: String,
        data: String,
    },

    /// Login was refused.
    #[error("remote authentication failed for user '{user}': {detail}")]
    AuthenticationFailed {
        user: String,
        detail: String,
    },

    /// The configured scope does not resolve to exactly one group.
    #[error("found {found} groups matching '{scope}', expected exactly 1")]
    ScopeNotFound {
        scope: String,
        found: usize,
    },

    /// The requested object does not exist on the remote side.
    #[error("remote object not found: {0}")]
    ObjectNotFound(String),

    /// Response body did not match the expected shape.
    #[error("remote response parse error in '{method}': {detail}")]
    ParseError {
        method: String,
        detail: String,
    },
}

// ---------------------------------------------------------------------------
// Template document errors
// ---------------------------------------------------------------------------

/// Errors reading or writing exported template documents.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The file is not a valid export document.
    #[error("invalid template document '{path}': {detail}")]
    InvalidDocument {
        path: String,
        detail: String,
    },

    /// Nothing to merge.
    #[error("no template documents given to merge")]
    NothingToMerge,

    /// JSON (de)serialization failure outside of a file context.
    #[error("template JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Generic I/O wrapper.
    #[error("template I/O error at '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Classification errors
// ---------------------------------------------------------------------------

/// Errors from classifying the working tree against the last commit.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// One or more paths are in a state that cannot be mapped onto
    /// added/modified/removed. All offending paths are reported together.
    #[error("working tree is in an inconsistent state: {}", .paths.join(", "))]
    Inconsistent { paths: Vec<String> },

    /// Reading the tree status failed.
    #[error("classification git error: {0}")]
    GitError(#[from] GitError),
}

// ---------------------------------------------------------------------------
// Dependency resolution errors
// ---------------------------------------------------------------------------

/// The dependency graph contains a cycle, so no import order exists.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("dependency cycle among {}", join_names(.cyclic))]
pub struct CycleError {
    /// Names that lie on a cycle.
    pub cyclic: BTreeSet<String>,
    /// Names that are acyclic themselves but wait on a cyclic name.
    pub blocked: BTreeSet<String>,
}

fn join_names(names: &BTreeSet<String>) -> String {
    names.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

// ---------------------------------------------------------------------------
// Sync engine errors
// ---------------------------------------------------------------------------

/// Fatal errors from a publish or apply run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another run is already using this engine.
    #[error("sync already in progress (started at {started_at})")]
    AlreadyRunning {
        started_at: String,
    },

    /// The configured export group holds no templates.
    #[error("no templates found in group '{0}'")]
    EmptyScope(String),

    /// The tree could not be classified.
    #[error("sync classification error: {0}")]
    ClassifyError(#[from] ClassifyError),

    /// No import order could be computed.
    #[error("sync resolution error: {0}")]
    CycleError(#[from] CycleError),

    /// Underlying Git error during sync.
    #[error("sync Git error: {0}")]
    GitError(#[from] GitError),

    /// Underlying remote API error during sync.
    #[error("sync remote error: {0}")]
    RemoteError(#[from] RemoteError),

    /// A template document could not be read or written.
    #[error("sync template error: {0}")]
    TemplateError(#[from] TemplateError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// No file for a named profile in any search location.
    #[error("no configuration for profile '{profile}' (searched: {searched})")]
    ProfileNotFound {
        profile: String,
        searched: String,
    },

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing {
        var: String,
        field: String,
    },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = GitError::RepositoryNotFound("/tmp/repo".into());
        assert_eq!(err.to_string(), "git repository not found at '/tmp/repo'");

        let err = RemoteError::ScopeNotFound {
            scope: "Templates/Exported".into(),
            found: 0,
        };
        assert!(err.to_string().contains("Templates/Exported"));

        let err = ConfigError::EnvVarMissing {
            var: "ZABBIX_PASSWORD".into(),
            field: "remote.password_env".into(),
        };
        assert!(err.to_string().contains("ZABBIX_PASSWORD"));

        let err = ClassifyError::Inconsistent {
            paths: vec!["a.json".into(), "b/c.json".into()],
        };
        assert_eq!(
            err.to_string(),
            "working tree is in an inconsistent state: a.json, b/c.json"
        );
    }

    #[test]
    fn test_cycle_error_names_cyclic_members() {
        let err = CycleError {
            cyclic: ["B".to_string(), "A".to_string()].into_iter().collect(),
            blocked: BTreeSet::new(),
        };
        assert_eq!(err.to_string(), "dependency cycle among A, B");
    }

    #[test]
    fn test_sync_error_from_subsystem() {
        let git_err: SyncError = GitError::RefNotFound("main".into()).into();
        assert!(matches!(git_err, SyncError::GitError(_)));

        let sync_err: SyncError = CycleError {
            cyclic: BTreeSet::new(),
            blocked: BTreeSet::new(),
        }
        .into();
        assert!(matches!(sync_err, SyncError::CycleError(_)));
    }
}
