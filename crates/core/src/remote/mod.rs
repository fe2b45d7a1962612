//! Remote template store access.
//!
//! The sync engine only talks to the remote side through
//! [`RemoteObjectApi`]; [`zabbix::ZabbixClient`] is the JSON-RPC
//! implementation used in production.

pub mod zabbix;

use async_trait::async_trait;

use crate::errors::RemoteError;
use crate::models::{ImportRuleSet, TemplateMeta};

pub use zabbix::ZabbixClient;

/// Operations the engine needs from the live configuration store.
#[async_trait]
pub trait RemoteObjectApi: Send + Sync {
    /// Templates that are members of `scope` (a group name or numeric id).
    async fn list_objects(&self, scope: &str) -> Result<Vec<TemplateMeta>, RemoteError>;

    /// Serialized export document for the template with the given id.
    async fn export_object(&self, id: &str) -> Result<String, RemoteError>;

    /// Create or update everything contained in `payload`.
    async fn import_object(&self, payload: &str, rules: &ImportRuleSet)
        -> Result<(), RemoteError>;

    /// Delete the named templates. Returns the names that existed and were
    /// removed; unknown names are not an error.
    async fn remove_objects(&self, names: &[String]) -> Result<Vec<String>, RemoteError>;
}
