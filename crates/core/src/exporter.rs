//! Writing the remote templates of the export group into the working tree.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::config::RemoteConfig;
use crate::errors::{SyncError, TemplateError};
use crate::remote::RemoteObjectApi;
use crate::template::{export_path, ExportDocument};

pub struct TemplateExporter<'a> {
    remote: &'a dyn RemoteObjectApi,
    export_group: &'a str,
    root_group: &'a str,
}

impl<'a> TemplateExporter<'a> {
    pub fn new(remote: &'a dyn RemoteObjectApi, config: &'a RemoteConfig) -> Self {
        Self {
            remote,
            export_group: &config.export_group,
            root_group: &config.root_group,
        }
    }

    /// Remove everything below `dir` except dot entries such as `.git`.
    pub fn clear_tree(dir: &Path) -> Result<usize, TemplateError> {
        let io_error = |path: &Path, source| TemplateError::IoError {
            path: path.display().to_string(),
            source,
        };
        let mut removed = 0;
        for entry in std::fs::read_dir(dir).map_err(|e| io_error(dir, e))? {
            let entry = entry.map_err(|e| io_error(dir, e))?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| io_error(path.as_path(), e))?;
            let result = if file_type.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            result.map_err(|e| io_error(path.as_path(), e))?;
            removed += 1;
        }
        debug!(dir = %dir.display(), removed, "cleared working tree");
        Ok(removed)
    }

    /// Replace the content of `dir` with every template of the export group,
    /// one file per group the template belongs to (the export group itself
    /// excluded).
    ///
    /// All templates are fetched before `dir` is cleared, so a listing or
    /// export failure leaves the tree untouched. Returns the written paths.
    /// An empty export group is an error.
    #[instrument(skip(self), fields(group = %self.export_group))]
    pub async fn export_all(&self, dir: &Path) -> Result<Vec<PathBuf>, SyncError> {
        let templates = self.remote.list_objects(self.export_group).await?;
        if templates.is_empty() {
            return Err(SyncError::EmptyScope(self.export_group.to_string()));
        }
        info!(count = templates.len(), "exporting templates");

        let mut fetched = Vec::with_capacity(templates.len());
        for meta in &templates {
            let targets: Vec<PathBuf> = meta
                .groups
                .iter()
                .filter(|g| g.name != self.export_group && g.id != self.export_group)
                .map(|g| export_path(dir, &g.name, self.root_group, &meta.name))
                .collect();
            if targets.is_empty() {
                debug!(template = %meta.name, "template has no group besides the export group");
                continue;
            }

            let payload = self.remote.export_object(&meta.id).await?;
            let mut doc = ExportDocument::parse(&meta.name, &payload)?;
            doc.blank_date();
            fetched.push((meta.name.as_str(), targets, doc));
        }

        Self::clear_tree(dir)?;
        let mut written = Vec::new();
        for (name, targets, doc) in fetched {
            for path in targets {
                debug!(template = %name, path = %path.display(), "writing template");
                doc.write(&path)?;
                written.push(path);
            }
        }
        info!(files = written.len(), "export complete");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RemoteError;
    use crate::models::{GroupRef, ImportRuleSet, TemplateMeta};
    use async_trait::async_trait;

    struct ListingRemote(Vec<TemplateMeta>);

    #[async_trait]
    impl RemoteObjectApi for ListingRemote {
        async fn list_objects(&self, _scope: &str) -> Result<Vec<TemplateMeta>, RemoteError> {
            Ok(self.0.clone())
        }
        async fn export_object(&self, id: &str) -> Result<String, RemoteError> {
            Ok(format!(
                r#"{{"zabbix_export":{{"version":"5.0","date":"2024-05-01T10:00:00Z","templates":[{{"template":"T{id}","name":"Template {id}"}}]}}}}"#
            ))
        }
        async fn import_object(&self, _: &str, _: &ImportRuleSet) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn remove_objects(&self, _: &[String]) -> Result<Vec<String>, RemoteError> {
            Ok(Vec::new())
        }
    }

    fn group(id: &str, name: &str) -> GroupRef {
        GroupRef {
            id: id.into(),
            name: name.into(),
        }
    }

    fn remote_config() -> RemoteConfig {
        toml::from_str(
            r#"
url = "http://localhost"
user = "Admin"
password_env = "PW"
export_group = "Templates/Exported"
root_group = "Templates"
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_export_writes_one_file_per_group() {
        let remote = ListingRemote(vec![TemplateMeta {
            id: "1".into(),
            host: "T1".into(),
            name: "Linux".into(),
            groups: vec![
                group("10", "Templates/Exported"),
                group("11", "Templates/OS"),
                group("12", "Templates/Apps/Web"),
            ],
        }]);
        let config = remote_config();
        let dir = tempfile::tempdir().unwrap();

        let written = TemplateExporter::new(&remote, &config)
            .export_all(dir.path())
            .await
            .unwrap();

        assert_eq!(
            written,
            vec![
                dir.path().join("OS/Linux.json"),
                dir.path().join("Apps/Web/Linux.json"),
            ]
        );
        let doc = ExportDocument::read(&dir.path().join("OS/Linux.json")).unwrap();
        assert_eq!(doc.zabbix_export.date.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_empty_scope_is_an_error() {
        let remote = ListingRemote(Vec::new());
        let config = remote_config();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("OS")).unwrap();
        std::fs::write(dir.path().join("OS/Linux.json"), "{}").unwrap();

        let result = TemplateExporter::new(&remote, &config)
            .export_all(dir.path())
            .await;
        assert!(matches!(result, Err(SyncError::EmptyScope(ref g)) if g == "Templates/Exported"));
        // Nothing was fetched, so the tree is left as it was.
        assert!(dir.path().join("OS/Linux.json").exists());
    }

    #[tokio::test]
    async fn test_export_replaces_stale_files() {
        let remote = ListingRemote(vec![TemplateMeta {
            id: "1".into(),
            host: "T1".into(),
            name: "Linux".into(),
            groups: vec![group("11", "Templates/OS")],
        }]);
        let config = remote_config();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::create_dir_all(dir.path().join("Old")).unwrap();
        std::fs::write(dir.path().join("Old/Gone.json"), "{}").unwrap();

        TemplateExporter::new(&remote, &config)
            .export_all(dir.path())
            .await
            .unwrap();

        assert!(!dir.path().join("Old").exists());
        assert!(dir.path().join(".git").exists());
        assert!(dir.path().join("OS/Linux.json").exists());
    }

    #[test]
    fn test_clear_tree_keeps_dot_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        std::fs::write(dir.path().join(".gitignore"), "").unwrap();
        std::fs::create_dir_all(dir.path().join("OS")).unwrap();
        std::fs::write(dir.path().join("OS/Linux.json"), "{}").unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();

        let removed = TemplateExporter::clear_tree(dir.path()).unwrap();
        assert_eq!(removed, 2);
        assert!(dir.path().join(".git/objects").exists());
        assert!(dir.path().join(".gitignore").exists());
        assert!(!dir.path().join("OS").exists());
    }
}
