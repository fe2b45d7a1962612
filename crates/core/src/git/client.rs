//! Local Git repository operations via `git2`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    Cred, ErrorCode, FetchOptions, IndexAddOption, Oid, PushOptions, RemoteCallbacks,
    Repository, ResetType, Signature, Status, StatusOptions,
};
use tracing::{debug, info, instrument, warn};

use super::remote_url::{ssh_user, url_user};
use super::{PathState, PathStatus, VersionedTreeStore};
use crate::config::GitConfig;
use crate::errors::GitError;

/// Name of the remote every checkout fetches from and pushes to.
const ORIGIN: &str = "origin";

/// How to authenticate against the remote.
#[derive(Debug, Clone, Default)]
pub enum GitCredentials {
    #[default]
    None,
    SshKey {
        user: String,
        public_key: PathBuf,
        private_key: PathBuf,
    },
    Token {
        user: String,
        token: String,
    },
}

impl GitCredentials {
    /// SSH keys win over a token when both are configured.
    pub fn from_config(config: &GitConfig) -> Self {
        match (&config.ssh_pubkey, &config.ssh_privkey, &config.token) {
            (Some(public_key), Some(private_key), _) => Self::SshKey {
                user: ssh_user(&config.url),
                public_key: public_key.clone(),
                private_key: private_key.clone(),
            },
            (_, _, Some(token)) => Self::Token {
                user: url_user(&config.url).unwrap_or_else(|| "x-access-token".into()),
                token: token.clone(),
            },
            _ => Self::None,
        }
    }

    fn callbacks(&self) -> RemoteCallbacks<'static> {
        let mut callbacks = RemoteCallbacks::new();
        match self.clone() {
            Self::None => {}
            Self::SshKey {
                user,
                public_key,
                private_key,
            } => {
                callbacks.credentials(move |_url, username, _allowed| {
                    Cred::ssh_key(
                        username.unwrap_or(&user),
                        Some(&public_key),
                        &private_key,
                        None,
                    )
                });
            }
            Self::Token { user, token } => {
                callbacks.credentials(move |_url, _username, _allowed| {
                    Cred::userpass_plaintext(&user, &token)
                });
            }
        }
        callbacks
    }
}

/// High-level Git client wrapping a `git2::Repository` checked out at one
/// branch.
pub struct GitClient {
    repo: Repository,
    repo_path: PathBuf,
    branch: String,
    credentials: GitCredentials,
    author_name: String,
    author_email: String,
}

impl GitClient {
    /// Open an existing Git repository at `repo_path` without touching HEAD.
    pub fn open<P: AsRef<Path>>(repo_path: P, branch: &str) -> Result<Self, GitError> {
        let path = repo_path.as_ref();
        info!(path = %path.display(), "opening git repository");
        let repo = Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        if repo.workdir().is_none() {
            return Err(GitError::NoWorkdir(path.display().to_string()));
        }
        Ok(Self {
            repo,
            repo_path: path.to_path_buf(),
            branch: branch.to_string(),
            credentials: GitCredentials::None,
            author_name: "tplsync".into(),
            author_email: "tplsync@localhost".into(),
        })
    }

    /// Open the checkout at `path` (fetching from origin) or clone `url`
    /// into it, then check out `branch`.
    ///
    /// A branch missing locally is created from `origin/<branch>`; a branch
    /// missing on both sides is created with an empty initial commit.
    #[instrument(skip(credentials), fields(path = %path.display()))]
    pub fn clone_or_open(
        url: &str,
        path: &Path,
        branch: &str,
        credentials: GitCredentials,
    ) -> Result<Self, GitError> {
        let repo = if path.join(".git").exists() {
            info!("reusing existing checkout");
            let repo = Repository::open(path)
                .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
            fetch_origin(&repo, &credentials)?;
            repo
        } else {
            info!("cloning git repository");
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut fetch_opts = FetchOptions::new();
            fetch_opts.remote_callbacks(credentials.callbacks());
            let mut builder = RepoBuilder::new();
            builder.fetch_options(fetch_opts);
            let repo = builder.clone(url, path)?;
            info!("clone completed");
            repo
        };

        let client = Self {
            repo,
            repo_path: path.to_path_buf(),
            branch: branch.to_string(),
            credentials,
            author_name: "tplsync".into(),
            author_email: "tplsync@localhost".into(),
        };
        client.checkout_branch()?;
        Ok(client)
    }

    /// Clone or open the repository described by `config` at `path`.
    pub fn from_config(config: &GitConfig, path: &Path) -> Result<Self, GitError> {
        let credentials = GitCredentials::from_config(config);
        let client = Self::clone_or_open(&config.url, path, &config.branch, credentials)?;
        Ok(client.with_author(&config.author_name, &config.author_email))
    }

    /// Identity used for commits.
    pub fn with_author(mut self, name: &str, email: &str) -> Self {
        self.author_name = name.to_string();
        self.author_email = email.to_string();
        self
    }

    fn signature(&self) -> Result<Signature<'static>, GitError> {
        Ok(Signature::now(&self.author_name, &self.author_email)?)
    }

    fn checkout_branch(&self) -> Result<(), GitError> {
        let local_ref = format!("refs/heads/{}", self.branch);
        let remote_ref = format!("refs/remotes/{}/{}", ORIGIN, self.branch);

        let remote_oid = match self.repo.find_reference(&remote_ref) {
            Ok(reference) => Some(reference.peel_to_commit()?.id()),
            Err(e) if e.code() == ErrorCode::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let local_oid = match self.repo.find_reference(&local_ref) {
            Ok(reference) => Some(reference.peel_to_commit()?.id()),
            Err(e) if e.code() == ErrorCode::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        match (local_oid, remote_oid) {
            (None, Some(oid)) => {
                debug!(branch = %self.branch, %oid, "creating branch from origin");
                self.repo
                    .reference(&local_ref, oid, true, "tplsync: track origin")?;
            }
            (Some(local), Some(remote)) => {
                if local == remote {
                    debug!(branch = %self.branch, "branch matches origin");
                } else if self.repo.graph_descendant_of(remote, local)? {
                    debug!(branch = %self.branch, %remote, "fast-forwarding to origin");
                    self.repo
                        .reference(&local_ref, remote, true, "tplsync: fast-forward")?;
                } else if self.repo.graph_descendant_of(local, remote)? {
                    info!(branch = %self.branch, "local branch is ahead of origin, keeping it");
                } else {
                    warn!(
                        branch = %self.branch,
                        %local,
                        %remote,
                        "local branch diverged from origin, keeping local commits"
                    );
                }
            }
            (Some(_), None) => {
                debug!(branch = %self.branch, "branch only exists locally");
            }
            (None, None) => {
                warn!(branch = %self.branch, "branch does not exist, creating it");
                let tree_oid = self.repo.treebuilder(None)?.write()?;
                let tree = self.repo.find_tree(tree_oid)?;
                let sig = self.signature()?;
                self.repo
                    .commit(Some(&local_ref), &sig, &sig, "Initial commit", &tree, &[])?;
            }
        }

        info!(branch = %self.branch, "checking out branch");
        self.repo.set_head(&local_ref)?;
        self.repo
            .checkout_head(Some(CheckoutBuilder::new().force()))?;
        Ok(())
    }
}

fn fetch_origin(repo: &Repository, credentials: &GitCredentials) -> Result<(), GitError> {
    let mut remote = match repo.find_remote(ORIGIN) {
        Ok(remote) => remote,
        Err(e) if e.code() == ErrorCode::NotFound => {
            warn!("repository has no origin remote, skipping fetch");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let mut fetch_opts = FetchOptions::new();
    fetch_opts.remote_callbacks(credentials.callbacks());
    remote.fetch(&[] as &[&str], Some(&mut fetch_opts), None)?;
    debug!("fetch completed");
    Ok(())
}

fn path_state(status: Status) -> Option<PathState> {
    if status.is_ignored() {
        return None;
    }
    let state = if status.is_conflicted() {
        PathState::Conflicted
    } else if status.intersects(Status::INDEX_TYPECHANGE | Status::WT_TYPECHANGE) {
        PathState::TypeChanged
    } else if status.intersects(Status::INDEX_RENAMED | Status::WT_RENAMED) {
        PathState::Renamed
    } else if status.intersects(Status::INDEX_NEW | Status::WT_NEW) {
        // Staged and then deleted again: absent on both sides.
        if status.contains(Status::WT_DELETED) {
            return None;
        }
        PathState::New
    } else if status.intersects(Status::INDEX_DELETED | Status::WT_DELETED) {
        PathState::Deleted
    } else if status.intersects(Status::INDEX_MODIFIED | Status::WT_MODIFIED) {
        PathState::Modified
    } else {
        PathState::Current
    };
    Some(state)
}

impl VersionedTreeStore for GitClient {
    fn workdir(&self) -> &Path {
        &self.repo_path
    }

    fn head_commit(&self) -> Result<Option<String>, GitError> {
        match self.repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?.id().to_string())),
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn status(&self) -> Result<Vec<PathStatus>, GitError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_unmodified(true)
            .include_ignored(false)
            .exclude_submodules(true);
        let statuses = self.repo.statuses(Some(&mut opts))?;

        let mut result = Vec::with_capacity(statuses.len());
        for entry in statuses.iter() {
            let path = match entry.path() {
                Some(p) => p.to_string(),
                None => String::from_utf8_lossy(entry.path_bytes()).into_owned(),
            };
            if let Some(state) = path_state(entry.status()) {
                result.push(PathStatus { path, state });
            }
        }
        debug!(count = result.len(), "collected path states");
        Ok(result)
    }

    #[instrument(skip(self))]
    fn hard_reset(&self, commit: &str) -> Result<(), GitError> {
        let oid = Oid::from_str(commit)?;
        let object = self
            .repo
            .find_object(oid, None)
            .map_err(|_| GitError::RefNotFound(commit.to_string()))?;
        self.repo.reset(&object, ResetType::Hard, None)?;
        info!("working tree reset");
        Ok(())
    }

    fn stage_all(&self) -> Result<(), GitError> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        debug!("staged all changes");
        Ok(())
    }

    #[instrument(skip(self, message))]
    fn commit(&self, message: &str) -> Result<String, GitError> {
        let mut index = self.repo.index()?;
        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;
        let sig = self.signature()?;
        let parent_commit = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(_) => None,
        };
        let parents: Vec<&git2::Commit> = parent_commit.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        info!(sha = %oid, "created commit");
        Ok(oid.to_string())
    }

    #[instrument(skip(self), fields(branch = %self.branch))]
    fn push(&self) -> Result<(), GitError> {
        info!("pushing");
        let mut remote = self.repo.find_remote(ORIGIN)?;
        let mut callbacks = self.credentials.callbacks();
        let push_error = Arc::new(Mutex::new(None::<String>));
        let push_error_clone = push_error.clone();
        callbacks.push_update_reference(move |refname, status| {
            if let Some(msg) = status {
                warn!(refname, msg, "push rejected");
                *push_error_clone.lock().unwrap_or_else(|e| e.into_inner()) =
                    Some(msg.to_string());
            }
            Ok(())
        });
        let mut push_opts = PushOptions::new();
        push_opts.remote_callbacks(callbacks);
        let refspec = format!("refs/heads/{0}:refs/heads/{0}", self.branch);
        remote.push(&[&refspec], Some(&mut push_opts))?;
        if let Some(detail) = push_error.lock().unwrap_or_else(|e| e.into_inner()).take() {
            return Err(GitError::PushRejected {
                branch: self.branch.clone(),
                detail,
            });
        }
        info!("push completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_client(dir: &Path) -> GitClient {
        Repository::init(dir).unwrap();
        GitClient::open(dir, "master")
            .unwrap()
            .with_author("Test", "test@test.com")
    }

    fn state_of(client: &GitClient, path: &str) -> Option<PathState> {
        client
            .status()
            .unwrap()
            .into_iter()
            .find(|s| s.path == path)
            .map(|s| s.state)
    }

    #[test]
    fn test_stage_and_commit() {
        let dir = tempfile::tempdir().unwrap();
        let client = init_client(dir.path());
        assert_eq!(client.head_commit().unwrap(), None);

        std::fs::write(dir.path().join("hello.json"), "{}").unwrap();
        client.stage_all().unwrap();
        let sha = client.commit("initial commit").unwrap();
        assert_eq!(client.head_commit().unwrap(), Some(sha));
    }

    #[test]
    fn test_status_reports_every_state() {
        let dir = tempfile::tempdir().unwrap();
        let client = init_client(dir.path());
        std::fs::create_dir_all(dir.path().join("OS")).unwrap();
        std::fs::write(dir.path().join("OS/keep.json"), "1").unwrap();
        std::fs::write(dir.path().join("OS/edit.json"), "1").unwrap();
        std::fs::write(dir.path().join("gone.json"), "1").unwrap();
        client.stage_all().unwrap();
        client.commit("base").unwrap();

        std::fs::write(dir.path().join("OS/edit.json"), "2").unwrap();
        std::fs::remove_file(dir.path().join("gone.json")).unwrap();
        std::fs::create_dir_all(dir.path().join("Apps/Web")).unwrap();
        std::fs::write(dir.path().join("Apps/Web/new.json"), "1").unwrap();

        assert_eq!(state_of(&client, "OS/keep.json"), Some(PathState::Current));
        assert_eq!(state_of(&client, "OS/edit.json"), Some(PathState::Modified));
        assert_eq!(state_of(&client, "gone.json"), Some(PathState::Deleted));
        assert_eq!(state_of(&client, "Apps/Web/new.json"), Some(PathState::New));
    }

    #[test]
    fn test_stage_all_records_deletions() {
        let dir = tempfile::tempdir().unwrap();
        let client = init_client(dir.path());
        std::fs::write(dir.path().join("a.json"), "1").unwrap();
        std::fs::write(dir.path().join("b.json"), "1").unwrap();
        client.stage_all().unwrap();
        client.commit("base").unwrap();

        std::fs::remove_file(dir.path().join("a.json")).unwrap();
        client.stage_all().unwrap();
        client.commit("remove a").unwrap();

        assert_eq!(state_of(&client, "a.json"), None);
        assert_eq!(state_of(&client, "b.json"), Some(PathState::Current));
    }

    #[test]
    fn test_hard_reset_restores_committed_content() {
        let dir = tempfile::tempdir().unwrap();
        let client = init_client(dir.path());
        std::fs::write(dir.path().join("a.json"), "committed").unwrap();
        std::fs::write(dir.path().join("b.json"), "committed").unwrap();
        client.stage_all().unwrap();
        let sha = client.commit("base").unwrap();

        std::fs::write(dir.path().join("a.json"), "regenerated").unwrap();
        std::fs::remove_file(dir.path().join("b.json")).unwrap();
        client.hard_reset(&sha).unwrap();

        let a = std::fs::read_to_string(dir.path().join("a.json")).unwrap();
        assert_eq!(a, "committed");
        assert!(dir.path().join("b.json").exists());
    }

    #[test]
    fn test_clone_empty_origin_bootstraps_branch_and_pushes() {
        let origin = tempfile::tempdir().unwrap();
        Repository::init_bare(origin.path()).unwrap();
        let work = tempfile::tempdir().unwrap();
        let path = work.path().join("repository");
        let url = origin.path().to_str().unwrap();

        let client = GitClient::clone_or_open(url, &path, "main", GitCredentials::None).unwrap();
        let initial = client.head_commit().unwrap().expect("initial commit");

        std::fs::write(path.join("t.json"), "{}").unwrap();
        client.stage_all().unwrap();
        let sha = client.commit("add t").unwrap();
        assert_ne!(sha, initial);
        client.push().unwrap();

        let bare = Repository::open_bare(origin.path()).unwrap();
        let pushed = bare.find_reference("refs/heads/main").unwrap().target().unwrap();
        assert_eq!(pushed.to_string(), sha);

        drop(client);
        let reopened = GitClient::clone_or_open(url, &path, "main", GitCredentials::None).unwrap();
        assert_eq!(reopened.head_commit().unwrap(), Some(sha));
    }

    #[test]
    fn test_repo_not_found() {
        assert!(matches!(
            GitClient::open("/nonexistent", "main"),
            Err(GitError::RepositoryNotFound(_))
        ));
    }

    #[test]
    fn test_credentials_prefer_ssh_keys() {
        let config: GitConfig = toml::from_str(
            r#"
url = "ssh://deploy@git.example.com/templates.git"
ssh_pubkey = "/keys/id.pub"
ssh_privkey = "/keys/id"
"#,
        )
        .unwrap();
        match GitCredentials::from_config(&config) {
            GitCredentials::SshKey { user, .. } => assert_eq!(user, "deploy"),
            other => panic!("unexpected credentials: {other:?}"),
        }
    }
}
