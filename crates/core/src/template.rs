//! Exported template documents.
//!
//! A document is the JSON produced by `configuration.export`. Only the parts
//! the engine relies on are typed; everything else is carried through
//! untouched in the flattened `other` maps so re-serialization does not lose
//! data.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::TemplateError;
use crate::models::TemplateObject;

/// Extension used for every template file in the tree.
pub const TEMPLATE_EXTENSION: &str = "json";

/// Root of an export document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub zabbix_export: ExportBody,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub templates: Vec<ExportedTemplate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_maps: Vec<Value>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// One template inside a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedTemplate {
    /// Technical name; linkage references point at this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Visible name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<NamedRef>,
    /// Linked templates this one depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub templates: Vec<NamedRef>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl ExportedTemplate {
    /// Identity used for dependency resolution and removal.
    pub fn identity(&self) -> &str {
        self.template.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRef {
    pub name: String,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl ExportDocument {
    /// Parse a document; `origin` names the source in error messages.
    pub fn parse(origin: &str, text: &str) -> Result<Self, TemplateError> {
        serde_json::from_str(text).map_err(|e| TemplateError::InvalidDocument {
            path: origin.to_string(),
            detail: e.to_string(),
        })
    }

    pub fn read(path: &Path) -> Result<Self, TemplateError> {
        let text = read_file(path)?;
        Self::parse(&path.display().to_string(), &text)
    }

    /// Serialize with 4-space indentation.
    pub fn to_pretty_string(&self) -> Result<String, TemplateError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        // serde_json only ever emits valid UTF-8.
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub fn write(&self, path: &Path) -> Result<(), TemplateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| TemplateError::IoError {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let text = self.to_pretty_string()?;
        debug!(path = %path.display(), "writing template document");
        std::fs::write(path, text).map_err(|source| TemplateError::IoError {
            path: path.display().to_string(),
            source,
        })
    }

    /// Clear the export timestamp so re-exports of an unchanged template are
    /// byte-identical.
    pub fn blank_date(&mut self) {
        if self.zabbix_export.date.is_some() {
            self.zabbix_export.date = Some(String::new());
        }
    }

    /// Set the export timestamp to `now`, as the remote side expects on import.
    pub fn stamp_date(&mut self, now: DateTime<Utc>) {
        if self.zabbix_export.date.is_some() {
            self.zabbix_export.date = Some(now.format("%Y-%m-%dT%H:%M:%SZ").to_string());
        }
    }

    /// Build one [`TemplateObject`] per template in the document.
    pub fn objects(&self, payload: &str, source_path: &Path) -> Vec<TemplateObject> {
        self.zabbix_export
            .templates
            .iter()
            .map(|t| TemplateObject {
                name: t.identity().to_string(),
                groups: t.groups.iter().map(|g| g.name.clone()).collect(),
                dependencies: t.templates.iter().map(|d| d.name.clone()).collect(),
                payload: payload.to_string(),
                source_path: source_path.to_path_buf(),
            })
            .collect()
    }
}

/// Read every template contained in the file at `path`.
pub fn read_objects(path: &Path) -> Result<Vec<TemplateObject>, TemplateError> {
    let text = read_file(path)?;
    let doc = ExportDocument::parse(&path.display().to_string(), &text)?;
    Ok(doc.objects(&text, path))
}

/// Re-serialize a payload with its timestamp set to `now`.
pub fn stamp_for_import(payload: &str, now: DateTime<Utc>) -> Result<String, TemplateError> {
    let mut doc = ExportDocument::parse("<payload>", payload)?;
    doc.stamp_date(now);
    Ok(serde_json::to_string(&doc)?)
}

/// Merge several documents into one.
///
/// Groups and value maps are de-duplicated, templates and triggers are
/// concatenated. Everything else is taken from the first document.
pub fn merge(docs: Vec<ExportDocument>) -> Result<ExportDocument, TemplateError> {
    let mut iter = docs.into_iter();
    let mut merged = iter.next().ok_or(TemplateError::NothingToMerge)?;
    for doc in iter {
        let body = doc.zabbix_export;
        let target = &mut merged.zabbix_export;
        for group in body.groups {
            if !target.groups.contains(&group) {
                target.groups.push(group);
            }
        }
        target.templates.extend(body.templates);
        target.triggers.extend(body.triggers);
        for value_map in body.value_maps {
            if !target.value_maps.contains(&value_map) {
                target.value_maps.push(value_map);
            }
        }
    }
    Ok(merged)
}

/// Path of the file a template is exported to for one of its groups.
///
/// The group name loses its `root_group/` prefix and every remaining `/`
/// level becomes a directory. Empty, `.` and `..` segments are dropped so the
/// result always stays below `root`.
pub fn export_path(root: &Path, group: &str, root_group: &str, template_name: &str) -> PathBuf {
    let relative = if root_group.is_empty() {
        group
    } else {
        group
            .strip_prefix(root_group)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(group)
    };

    let mut path = root.to_path_buf();
    for component in Path::new(relative).components() {
        if let Component::Normal(part) = component {
            path.push(part);
        }
    }
    let file_name = template_name.replace(['/', '\\'], "_");
    path.push(format!("{file_name}.{TEMPLATE_EXTENSION}"));
    path
}

/// Names referenced by the templates of a document but not defined in it.
pub fn external_references(doc: &ExportDocument) -> BTreeSet<String> {
    let defined: BTreeSet<&str> = doc
        .zabbix_export
        .templates
        .iter()
        .map(ExportedTemplate::identity)
        .collect();
    doc.zabbix_export
        .templates
        .iter()
        .flat_map(|t| t.templates.iter())
        .filter(|d| !defined.contains(d.name.as_str()))
        .map(|d| d.name.clone())
        .collect()
}

fn read_file(path: &Path) -> Result<String, TemplateError> {
    std::fs::read_to_string(path).map_err(|source| TemplateError::IoError {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const LINUX: &str = r#"{
        "zabbix_export": {
            "version": "5.0",
            "date": "2020-04-21T08:15:02Z",
            "groups": [{"name": "Templates/OS"}],
            "templates": [{
                "template": "Template OS Linux",
                "name": "Template OS Linux",
                "groups": [{"name": "Templates/OS"}],
                "templates": [{"name": "Template Module ICMP Ping"}],
                "items": [{"name": "Uptime", "key": "system.uptime"}]
            }],
            "value_maps": [{"name": "Service state"}]
        }
    }"#;

    const PING: &str = r#"{
        "zabbix_export": {
            "version": "5.0",
            "date": "2020-04-21T08:15:02Z",
            "groups": [{"name": "Templates/OS"}, {"name": "Templates/Modules"}],
            "templates": [{
                "template": "Template Module ICMP Ping",
                "name": "ICMP Ping",
                "groups": [{"name": "Templates/Modules"}]
            }],
            "triggers": [{"expression": "{Template Module ICMP Ping:icmpping.max(3m)}=0"}],
            "value_maps": [{"name": "Service state"}]
        }
    }"#;

    #[test]
    fn test_objects_use_technical_name_and_linkage() {
        let doc = ExportDocument::parse("linux.json", LINUX).unwrap();
        let objects = doc.objects(LINUX, Path::new("OS/Template OS Linux.json"));
        assert_eq!(objects.len(), 1);
        let linux = &objects[0];
        assert_eq!(linux.name, "Template OS Linux");
        assert_eq!(linux.groups, vec!["Templates/OS"]);
        assert!(linux.dependencies.contains("Template Module ICMP Ping"));
        assert_eq!(linux.payload, LINUX);
    }

    #[test]
    fn test_blank_date_keeps_unknown_fields() {
        let mut doc = ExportDocument::parse("linux.json", LINUX).unwrap();
        doc.blank_date();
        let text = doc.to_pretty_string().unwrap();
        assert!(text.contains("\"date\": \"\""));
        assert!(text.contains("system.uptime"));
        assert!(text.contains("\n        \"version\""));

        let reparsed = ExportDocument::parse("again", &text).unwrap();
        assert_eq!(reparsed.zabbix_export.templates[0].other["items"][0]["key"], "system.uptime");
    }

    #[test]
    fn test_document_without_date_stays_without_date() {
        let mut doc =
            ExportDocument::parse("x", r#"{"zabbix_export":{"version":"6.0","templates":[]}}"#)
                .unwrap();
        doc.blank_date();
        assert!(doc.zabbix_export.date.is_none());
        assert!(!doc.to_pretty_string().unwrap().contains("date"));
    }

    #[test]
    fn test_stamp_for_import_sets_current_date() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let stamped = stamp_for_import(LINUX, now).unwrap();
        let doc = ExportDocument::parse("stamped", &stamped).unwrap();
        assert_eq!(doc.zabbix_export.date.as_deref(), Some("2024-03-01T12:30:00Z"));
    }

    #[test]
    fn test_invalid_document_is_reported_with_origin() {
        let err = ExportDocument::parse("broken.json", "{\"nope\": 1}").unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn test_merge_dedups_groups_and_value_maps() {
        let docs = vec![
            ExportDocument::parse("a", LINUX).unwrap(),
            ExportDocument::parse("b", PING).unwrap(),
        ];
        let merged = merge(docs).unwrap().zabbix_export;
        assert_eq!(merged.groups.len(), 2);
        assert_eq!(merged.templates.len(), 2);
        assert_eq!(merged.triggers.len(), 1);
        assert_eq!(merged.value_maps.len(), 1);
        assert!(matches!(merge(Vec::new()), Err(TemplateError::NothingToMerge)));
    }

    #[test]
    fn test_merged_document_resolves_internal_references() {
        let docs = vec![
            ExportDocument::parse("a", LINUX).unwrap(),
            ExportDocument::parse("b", PING).unwrap(),
        ];
        let single = ExportDocument::parse("a", LINUX).unwrap();
        assert_eq!(
            external_references(&single).into_iter().collect::<Vec<_>>(),
            vec!["Template Module ICMP Ping"]
        );
        assert!(external_references(&merge(docs).unwrap()).is_empty());
    }

    #[test]
    fn test_export_path_strips_root_group() {
        let root = Path::new("/repo");
        assert_eq!(
            export_path(root, "Templates/OS/Linux", "Templates", "Template OS Linux"),
            PathBuf::from("/repo/OS/Linux/Template OS Linux.json")
        );
        assert_eq!(
            export_path(root, "Other/Apps", "Templates", "App"),
            PathBuf::from("/repo/Other/Apps/App.json")
        );
        assert_eq!(
            export_path(root, "Apps", "", "A/B"),
            PathBuf::from("/repo/Apps/A_B.json")
        );
    }

    #[test]
    fn test_export_path_never_escapes_root() {
        let root = Path::new("/repo");
        assert_eq!(
            export_path(root, "Templates/../../etc", "Templates", "x"),
            PathBuf::from("/repo/etc/x.json")
        );
    }
}
