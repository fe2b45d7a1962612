//! TOML-based configuration system for tplsync.
//!
//! All sensitive values (passwords, tokens) are stored as `_env` fields that
//! reference environment variable names. The actual secrets are resolved at
//! runtime via [`AppConfig::resolve_env_vars`].
//!
//! A configuration file is selected by profile name: `<profile>.toml` is
//! looked up in an ordered list of directories, first match wins.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::models::ImportRuleSet;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Working directory and logging settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Remote template API settings.
    pub remote: RemoteConfig,

    /// Git repository settings.
    pub git: GitConfig,

    /// Sync behaviour settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Rules sent with every template import.
    #[serde(default)]
    pub import_rules: ImportRuleSet,
}

// ---------------------------------------------------------------------------
// General
// ---------------------------------------------------------------------------

/// Working directory and logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Scratch directory; the repository is checked out below it.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("tplsync")
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            log_level: default_log_level(),
        }
    }
}

impl GeneralConfig {
    /// Location of the checked-out repository.
    pub fn repository_path(&self) -> PathBuf {
        self.work_dir.join("repository")
    }
}

// ---------------------------------------------------------------------------
// Remote
// ---------------------------------------------------------------------------

/// Remote template API connection and scope settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// JSON-RPC endpoint (e.g. `https://zabbix.example.com/api_jsonrpc.php`).
    pub url: String,

    /// API username.
    pub user: String,

    /// Environment variable holding the API password.
    pub password_env: String,

    /// Group whose member templates are synchronized.
    pub export_group: String,

    /// Group prefix stripped when deriving directory names.
    #[serde(default)]
    pub root_group: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Resolved password (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub password: Option<String>,
}

fn default_timeout() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Git
// ---------------------------------------------------------------------------

/// Git repository and commit identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Clone URL of the template repository.
    pub url: String,

    /// Branch holding the templates (default `main`).
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Commit author name.
    #[serde(default = "default_author_name")]
    pub author_name: String,

    /// Commit author email.
    #[serde(default = "default_author_email")]
    pub author_email: String,

    /// SSH public key used for fetch and push.
    #[serde(default)]
    pub ssh_pubkey: Option<PathBuf>,

    /// SSH private key used for fetch and push.
    #[serde(default)]
    pub ssh_privkey: Option<PathBuf>,

    /// Environment variable holding an HTTPS access token.
    #[serde(default)]
    pub token_env: Option<String>,

    /// Push after committing (default true).
    #[serde(default = "default_true")]
    pub push: bool,

    /// Resolved token.
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_branch() -> String {
    "main".into()
}
fn default_author_name() -> String {
    "tplsync".into()
}
fn default_author_email() -> String {
    "tplsync@localhost".into()
}

// ---------------------------------------------------------------------------
// Sync behaviour
// ---------------------------------------------------------------------------

/// Sync behaviour configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Upper bound on imports running at once inside one wave.
    #[serde(default = "default_concurrency")]
    pub max_concurrent_imports: usize,

    /// Delete templates from the remote side when their file was removed
    /// from the repository.
    #[serde(default = "default_true")]
    pub remove_deleted: bool,
}

fn default_concurrency() -> usize {
    1
}
fn default_true() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_imports: default_concurrency(),
            remove_deleted: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Find the file for a named profile in `search_dirs`.
    pub fn find_profile(profile: &str, search_dirs: &[PathBuf]) -> Result<PathBuf, ConfigError> {
        let file_name = format!("{profile}.toml");
        for dir in search_dirs {
            let candidate = dir.join(&file_name);
            debug!(path = %candidate.display(), "looking for profile");
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(ConfigError::ProfileNotFound {
            profile: profile.to_string(),
            searched: search_dirs
                .iter()
                .map(|d| d.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    /// Resolve all `*_env` fields from environment variables and populate the
    /// corresponding resolved fields.
    ///
    /// The remote password is required; an unset git token only logs a
    /// warning since SSH keys may be used instead.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        self.remote.password = resolve_optional_env(&self.remote.password_env, "remote.password_env");
        if self.remote.password.is_none() {
            return Err(ConfigError::EnvVarMissing {
                var: self.remote.password_env.clone(),
                field: "remote.password_env".into(),
            });
        }

        if let Some(ref env_name) = self.git.token_env {
            self.git.token = resolve_optional_env(env_name, "git.token_env");
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote.url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "remote.url".into(),
                detail: "remote API URL must not be empty".into(),
            });
        }
        if self.remote.user.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "remote.user".into(),
                detail: "remote API user must not be empty".into(),
            });
        }
        if self.remote.export_group.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "remote.export_group".into(),
                detail: "export group must not be empty".into(),
            });
        }
        if self.git.url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "git.url".into(),
                detail: "git URL must not be empty".into(),
            });
        }
        if self.git.branch.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "git.branch".into(),
                detail: "branch must not be empty".into(),
            });
        }
        if self.git.ssh_pubkey.is_some() != self.git.ssh_privkey.is_some() {
            return Err(ConfigError::InvalidValue {
                field: "git.ssh_privkey".into(),
                detail: "ssh_pubkey and ssh_privkey must be set together".into(),
            });
        }
        if self.sync.max_concurrent_imports == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.max_concurrent_imports".into(),
                detail: "must be > 0".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[general]
work_dir = "/tmp/tplsync-test"
log_level = "debug"

[remote]
url = "https://zabbix.example.com/api_jsonrpc.php"
user = "Admin"
password_env = "ZABBIX_PASSWORD"
export_group = "Templates/Exported"
root_group = "Templates"

[git]
url = "ssh://git@git.example.com/monitoring/templates.git"
branch = "production"
author_name = "Template Bot"
author_email = "bot@example.com"
ssh_pubkey = "/etc/tplsync/id_ed25519.pub"
ssh_privkey = "/etc/tplsync/id_ed25519"

[sync]
max_concurrent_imports = 4
remove_deleted = false

[import_rules.items]
createMissing = true
updateExisting = true
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.remote.export_group, "Templates/Exported");
        assert_eq!(config.git.branch, "production");
        assert_eq!(config.sync.max_concurrent_imports, 4);
        assert!(!config.sync.remove_deleted);
        assert_eq!(config.import_rules.items.unwrap().delete_missing, None);
        assert_eq!(
            config.general.repository_path(),
            PathBuf::from("/tmp/tplsync-test/repository")
        );
        config.validate().expect("sample config is valid");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.general.log_level, "debug");
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/config.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_find_profile_first_match_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("prod.toml"), sample_toml()).unwrap();
        std::fs::write(first.path().join("other.toml"), sample_toml()).unwrap();

        let dirs = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        let found = AppConfig::find_profile("prod", &dirs).unwrap();
        assert_eq!(found, second.path().join("prod.toml"));

        let missing = AppConfig::find_profile("staging", &dirs);
        assert!(matches!(missing, Err(ConfigError::ProfileNotFound { .. })));
    }

    #[test]
    fn test_validate_rejects_half_configured_ssh_keys() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.git.ssh_pubkey = None;
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "git.ssh_privkey"
        ));
    }

    #[test]
    fn test_validate_rejects_empty_group() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.remote.export_group = String::new();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "remote.export_group"
        ));
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("TEST_TPLSYNC_PW", "s3cret");
        std::env::set_var("TEST_TPLSYNC_TOKEN", "glpat-abc");

        let toml_str = r#"
[remote]
url = "https://zabbix.example.com/api_jsonrpc.php"
user = "Admin"
password_env = "TEST_TPLSYNC_PW"
export_group = "Templates/Exported"
[git]
url = "https://git.example.com/templates.git"
token_env = "TEST_TPLSYNC_TOKEN"
"#;
        let mut config: AppConfig = toml::from_str(toml_str).unwrap();
        config.resolve_env_vars().unwrap();

        assert_eq!(config.remote.password.as_deref(), Some("s3cret"));
        assert_eq!(config.git.token.as_deref(), Some("glpat-abc"));

        std::env::remove_var("TEST_TPLSYNC_PW");
        std::env::remove_var("TEST_TPLSYNC_TOKEN");
    }

    #[test]
    fn test_missing_password_is_fatal() {
        let toml_str = r#"
[remote]
url = "https://zabbix.example.com/api_jsonrpc.php"
user = "Admin"
password_env = "TEST_TPLSYNC_UNSET_PASSWORD"
export_group = "Templates/Exported"
[git]
url = "https://git.example.com/templates.git"
"#;
        let mut config: AppConfig = toml::from_str(toml_str).unwrap();
        let result = config.resolve_env_vars();
        assert!(matches!(result, Err(ConfigError::EnvVarMissing { ref var, .. }) if var == "TEST_TPLSYNC_UNSET_PASSWORD"));
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
[remote]
url = "https://zabbix.example.com/api_jsonrpc.php"
user = "Admin"
password_env = "ZABBIX_PASSWORD"
export_group = "Templates/Exported"
[git]
url = "https://git.example.com/templates.git"
"#;
        let config: AppConfig = toml::from_str(minimal).unwrap();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.git.branch, "main");
        assert!(config.git.push);
        assert_eq!(config.remote.timeout_secs, 60);
        assert_eq!(config.remote.root_group, "");
        assert_eq!(config.sync.max_concurrent_imports, 1);
        assert!(config.sync.remove_deleted);
        assert_eq!(config.import_rules, ImportRuleSet::default());
    }
}
