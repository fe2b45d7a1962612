//! tplsync core library.
//!
//! This crate keeps monitoring templates and a Git repository in sync:
//! configuration, the template document codec, change classification,
//! dependency ordering, commit messages, the Git and remote API clients,
//! and the sync engine tying them together.

pub mod classifier;
pub mod config;
pub mod errors;
pub mod exporter;
pub mod git;
pub mod models;
pub mod narrator;
pub mod remote;
pub mod resolver;
pub mod sync_engine;
pub mod template;

// Re-exports for convenience.
pub use classifier::ChangeClassifier;
pub use config::AppConfig;
pub use git::{GitClient, VersionedTreeStore};
pub use narrator::CommitNarrator;
pub use remote::{RemoteObjectApi, ZabbixClient};
pub use resolver::DependencyResolver;
pub use sync_engine::SyncEngine;
