//! tplsync command-line tool.
//!
//! Publishes monitoring templates from the remote API into a Git repository
//! and applies the repository back to the remote side. Also merges export
//! files and generates / validates configuration files.

mod style;
mod summary;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tplsync_core::config::AppConfig;
use tplsync_core::git::GitClient;
use tplsync_core::remote::ZabbixClient;
use tplsync_core::sync_engine::SyncEngine;
use tplsync_core::template::{self, ExportDocument};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Keep monitoring templates and a Git repository in sync.
#[derive(Parser, Debug)]
#[command(name = "tplsync", version, about = "Synchronize monitoring templates with Git")]
struct Cli {
    /// Log level (trace, debug, info, warn, error). Overrides the config.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// How to find the configuration file.
#[derive(Args, Debug, Clone)]
struct ConfigSource {
    /// Named profile, looked up as `<profile>.toml`.
    #[arg(short, long, default_value = "tplsync")]
    profile: String,

    /// Explicit configuration file; takes precedence over the profile.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Export the remote templates and commit them to Git.
    Publish(ConfigSource),

    /// Apply the templates committed in Git to the remote side.
    Apply(ConfigSource),

    /// Merge several export files into one.
    Merge {
        /// File to write the merged export to.
        output: PathBuf,

        /// Export files to merge.
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./tplsync.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate(ConfigSource),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("Error: {:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Publish(source) => {
            let config = load_config(&source)?;
            init_logging(cli.log_level.as_deref(), Some(&config));
            let engine = build_engine(config).await?;
            let outcome = engine.publish().await.context("publish failed")?;
            summary::print_publish(&outcome);
            Ok(())
        }
        Commands::Apply(source) => {
            let config = load_config(&source)?;
            init_logging(cli.log_level.as_deref(), Some(&config));
            let engine = build_engine(config).await?;
            let outcome = engine.apply().await.context("apply failed")?;
            summary::print_apply(&outcome);
            Ok(())
        }
        Commands::Merge { output, inputs } => {
            init_logging(cli.log_level.as_deref(), None);
            cmd_merge(&output, &inputs)
        }
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate(source) => cmd_validate(&source),
    }
}

/// Initialise tracing. The flag wins over the config, `info` is the fallback.
fn init_logging(flag: Option<&str>, config: Option<&AppConfig>) {
    let level = flag
        .or_else(|| config.map(|c| c.general.log_level.as_str()))
        .unwrap_or("info");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_target(false)
        .init();
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

/// Directories searched for `<profile>.toml`, first match wins.
fn profile_search_dirs() -> Vec<PathBuf> {
    let mut dirs_list = vec![PathBuf::from(".")];
    if let Some(config_dir) = dirs::config_dir() {
        dirs_list.push(config_dir.join("tplsync"));
    }
    dirs_list.push(PathBuf::from("/etc/tplsync"));
    dirs_list
}

fn config_path(source: &ConfigSource) -> Result<PathBuf> {
    match &source.config {
        Some(path) => Ok(path.clone()),
        None => AppConfig::find_profile(&source.profile, &profile_search_dirs())
            .context("failed to find configuration profile"),
    }
}

fn load_config(source: &ConfigSource) -> Result<AppConfig> {
    let path = config_path(source)?;
    AppConfig::load_and_resolve(&path)
        .with_context(|| format!("failed to load configuration {}", path.display()))
}

/// Log in to the remote API and prepare the checkout.
async fn build_engine(config: AppConfig) -> Result<SyncEngine<GitClient>> {
    let password = config
        .remote
        .password
        .clone()
        .context("remote password was not resolved")?;
    let remote = ZabbixClient::connect(
        &config.remote.url,
        &config.remote.user,
        &password,
        Duration::from_secs(config.remote.timeout_secs),
    )
    .await
    .context("failed to connect to the remote API")?;

    let repo_path = config.general.repository_path();
    info!(path = %repo_path.display(), "preparing git checkout");
    let client = GitClient::from_config(&config.git, &repo_path)
        .context("failed to prepare the git checkout")?;

    Ok(SyncEngine::new(config, client, Arc::new(remote)))
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_merge(output: &Path, inputs: &[PathBuf]) -> Result<()> {
    let docs = inputs
        .iter()
        .map(|path| {
            ExportDocument::read(path).with_context(|| format!("failed to read {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    let merged = template::merge(docs).context("failed to merge templates")?;
    merged
        .write(output)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!(
        "{}",
        style::success(&format!(
            "Merged {} file(s) into {} ({} templates)",
            inputs.len(),
            output.display(),
            merged.zabbix_export.templates.len()
        ))
    );
    let external = template::external_references(&merged);
    if !external.is_empty() {
        let names: Vec<&str> = external.iter().map(String::as_str).collect();
        println!(
            "{}",
            style::warn(&format!(
                "Linked templates not part of the merged file: {}",
                names.join(", ")
            ))
        );
    }
    Ok(())
}

const DEFAULT_CONFIG: &str = r#"# tplsync configuration
# See documentation for all available options.

[general]
work_dir = "/var/lib/tplsync"
log_level = "info"

[remote]
url = "https://zabbix.example.com/api_jsonrpc.php"
user = "Admin"
password_env = "ZABBIX_PASSWORD"
# Templates in this group are synchronized.
export_group = "Templates/Exported"
# Stripped from group names when building directories.
root_group = "Templates"
timeout_secs = 60

[git]
url = "ssh://git@git.example.com/monitoring/templates.git"
branch = "main"
author_name = "tplsync"
author_email = "tplsync@example.com"
ssh_pubkey = "/etc/tplsync/id_ed25519.pub"
ssh_privkey = "/etc/tplsync/id_ed25519"
# token_env = "GIT_TOKEN"
push = true

[sync]
max_concurrent_imports = 1
remove_deleted = true

# Override single import rules, e.g.:
# [import_rules.items]
# createMissing = true
# updateExisting = true
# deleteMissing = false
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }
    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!("{}", style::success(&format!("Default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file with your remote API and Git details");
    println!("  2. Set the referenced environment variables (ZABBIX_PASSWORD, ...)");
    println!("  3. Validate with: tplsync validate --config {}", output.display());
    println!("  4. Publish with: tplsync publish --config {}", output.display());
    Ok(())
}

fn cmd_validate(source: &ConfigSource) -> Result<()> {
    let path = config_path(source)?;
    println!("Validating configuration: {}", path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(&path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    // Missing secrets are reported in the summary below.
    let _ = config.resolve_env_vars();
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    let set = |present: bool| if present { "set" } else { "NOT SET" };
    println!();
    println!("Configuration summary:");
    println!("  Remote URL     : {}", config.remote.url);
    println!("  Remote user    : {}", config.remote.user);
    println!("  Remote password: {}", set(config.remote.password.is_some()));
    println!("  Export group   : {}", config.remote.export_group);
    println!("  Root group     : {}", config.remote.root_group);
    println!("  Git URL        : {}", config.git.url);
    println!("  Git branch     : {}", config.git.branch);
    println!(
        "  Git auth       : {}",
        if config.git.ssh_privkey.is_some() {
            "ssh key"
        } else if config.git.token.is_some() {
            "token"
        } else {
            "none"
        }
    );
    println!("  Work directory : {}", config.general.work_dir.display());
    println!("  Concurrency    : {}", config.sync.max_concurrent_imports);
    println!();
    println!("Configuration is valid.");
    Ok(())
}
