//! Domain model types used throughout tplsync.
//!
//! These types bridge the tree store, the remote API client and the sync
//! engine.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// A named configuration unit read from one snapshot (tree or remote).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateObject {
    /// Unique template name.
    pub name: String,
    /// Names of the groups the template belongs to.
    pub groups: Vec<String>,
    /// Templates that must exist before this one can be imported.
    pub dependencies: BTreeSet<String>,
    /// Serialized export document this template was read from.
    pub payload: String,
    /// File the template was read from.
    pub source_path: PathBuf,
}

/// A group reference as returned by the remote listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRef {
    #[serde(rename = "groupid")]
    pub id: String,
    pub name: String,
}

/// Remote listing entry for a template.
///
/// `host` is the technical name that linkage references use; `name` is the
/// visible name used for file names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMeta {
    #[serde(rename = "templateid")]
    pub id: String,
    #[serde(default)]
    pub host: String,
    pub name: String,
    #[serde(default)]
    pub groups: Vec<GroupRef>,
}

// ---------------------------------------------------------------------------
// Change classification
// ---------------------------------------------------------------------------

/// Status of one tracked path between the last commit and the working tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Unchanged,
    Added,
    Modified,
    Removed,
}

impl std::fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unchanged => write!(f, "unchanged"),
            Self::Added => write!(f, "added"),
            Self::Modified => write!(f, "modified"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// Classification of one path. Paths are relative to the tree root and use
/// `/` as separator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub path: String,
    pub status: ChangeStatus,
}

impl ChangeRecord {
    pub fn new(path: impl Into<String>, status: ChangeStatus) -> Self {
        Self {
            path: path.into(),
            status,
        }
    }

    pub fn is_change(&self) -> bool {
        self.status != ChangeStatus::Unchanged
    }
}

// ---------------------------------------------------------------------------
// Import rules
// ---------------------------------------------------------------------------

/// Import behaviour flags for one entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleFlags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_missing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_existing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_missing: Option<bool>,
}

impl RuleFlags {
    const fn new(create: Option<bool>, update: Option<bool>, delete: Option<bool>) -> Self {
        Self {
            create_missing: create,
            update_existing: update,
            delete_missing: delete,
        }
    }
}

/// Rules sent along with every template import.
///
/// Entities left as `None` are omitted from the request and fall back to the
/// server defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportRuleSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applications: Option<RuleFlags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery_rules: Option<RuleFlags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graphs: Option<RuleFlags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<RuleFlags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosts: Option<RuleFlags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub httptests: Option<RuleFlags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<RuleFlags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<RuleFlags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maps: Option<RuleFlags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screens: Option<RuleFlags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_linkage: Option<RuleFlags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub templates: Option<RuleFlags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_screens: Option<RuleFlags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggers: Option<RuleFlags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_maps: Option<RuleFlags>,
}

impl Default for ImportRuleSet {
    /// Create and update everything a template owns; never touch hosts.
    fn default() -> Self {
        let t = Some(true);
        let f = Some(false);
        let full = Some(RuleFlags::new(t, t, t));
        let create_update = Some(RuleFlags::new(t, t, None));
        let create_delete = Some(RuleFlags::new(t, None, t));
        Self {
            applications: create_delete,
            discovery_rules: full,
            graphs: full,
            groups: Some(RuleFlags::new(t, None, None)),
            hosts: Some(RuleFlags::new(f, f, None)),
            httptests: full,
            images: create_update,
            items: full,
            maps: create_update,
            screens: create_update,
            template_linkage: create_delete,
            templates: create_update,
            template_screens: full,
            triggers: full,
            value_maps: create_update,
        }
    }
}

// ---------------------------------------------------------------------------
// Run outcomes
// ---------------------------------------------------------------------------

/// What happened to one object during an apply run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ObjectStatus {
    Applied,
    Skipped { reason: String },
    Failed { error: String },
}

/// Per-object result, kept in the batch summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectOutcome {
    pub name: String,
    #[serde(flatten)]
    pub status: ObjectStatus,
}

impl ObjectOutcome {
    pub fn applied(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ObjectStatus::Applied,
        }
    }

    pub fn skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ObjectStatus::Skipped {
                reason: reason.into(),
            },
        }
    }

    pub fn failed(name: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            name: name.into(),
            status: ObjectStatus::Failed {
                error: error.to_string(),
            },
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self.status, ObjectStatus::Applied)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, ObjectStatus::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, ObjectStatus::Skipped { .. })
    }
}

/// Accumulated per-object results of one apply phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub outcomes: Vec<ObjectOutcome>,
}

impl BatchOutcome {
    pub fn push(&mut self, outcome: ObjectOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_applied()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_skipped()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ObjectOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }
}

/// Result of a publish run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishOutcome {
    /// Every non-unchanged record that went into the commit.
    pub changes: Vec<ChangeRecord>,
    /// Commit created for the changes, if any.
    pub commit: Option<String>,
    /// Whether the commit was pushed.
    pub pushed: bool,
    pub started_at: String,
    pub completed_at: Option<String>,
}

/// Result of an apply run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyOutcome {
    /// Tree state the run was applied from.
    pub checkpoint: Option<String>,
    /// Import order that was used.
    pub waves: Vec<BTreeSet<String>>,
    pub removals: BatchOutcome,
    pub imports: BatchOutcome,
    pub started_at: String,
    pub completed_at: Option<String>,
}

impl ApplyOutcome {
    pub fn has_failures(&self) -> bool {
        self.removals.failed() > 0 || self.imports.failed() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules_serialize_camel_case() {
        let json = serde_json::to_value(ImportRuleSet::default()).unwrap();
        assert_eq!(json["discoveryRules"]["createMissing"], true);
        assert_eq!(json["discoveryRules"]["deleteMissing"], true);
        assert_eq!(json["hosts"]["createMissing"], false);
        assert_eq!(json["hosts"]["updateExisting"], false);
        assert!(json["groups"].get("updateExisting").is_none());
        assert!(json["templateLinkage"].get("updateExisting").is_none());
        assert_eq!(json["valueMaps"]["updateExisting"], true);
    }

    #[test]
    fn test_rules_partial_override_keeps_other_defaults() {
        let rules: ImportRuleSet =
            toml::from_str("[items]\ncreateMissing = true\n").expect("parse rules");
        let items = rules.items.unwrap();
        assert_eq!(items.create_missing, Some(true));
        assert_eq!(items.delete_missing, None);
        assert_eq!(rules.triggers, ImportRuleSet::default().triggers);
    }

    #[test]
    fn test_batch_counts() {
        let mut batch = BatchOutcome::default();
        batch.push(ObjectOutcome::applied("A"));
        batch.push(ObjectOutcome::skipped("B", "not in batch"));
        batch.push(ObjectOutcome::failed("C", "rejected"));
        assert_eq!(batch.applied(), 1);
        assert_eq!(batch.skipped(), 1);
        assert_eq!(batch.failed(), 1);
        assert!(batch.get("C").unwrap().is_failed());
    }

    #[test]
    fn test_template_meta_deserializes_remote_listing() {
        let meta: TemplateMeta = serde_json::from_str(
            r#"{"templateid":"10001","name":"Linux","groups":[{"groupid":"1","name":"Templates/OS"}]}"#,
        )
        .unwrap();
        assert_eq!(meta.id, "10001");
        assert_eq!(meta.groups[0].name, "Templates/OS");
    }
}
