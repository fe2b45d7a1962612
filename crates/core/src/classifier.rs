//! Classification of the working tree against the last commit.
//!
//! The tree store is expected to hold a fresh export written over the last
//! committed snapshot. Each path is labelled relative to that commit; the
//! two sync directions then read the labels differently.

use std::path::Path;

use tracing::{debug, warn};

use crate::errors::ClassifyError;
use crate::git::{PathState, VersionedTreeStore};
use crate::models::{ChangeRecord, ChangeStatus};
use crate::template::TEMPLATE_EXTENSION;

/// Files to act on when applying the tree to the remote side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportPlan {
    /// Exported by the remote but no longer tracked: delete remotely.
    pub remove: Vec<String>,
    /// Tracked content the remote lacks or differs from: import.
    pub import: Vec<String>,
}

impl ImportPlan {
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.import.is_empty()
    }
}

pub struct ChangeClassifier;

impl ChangeClassifier {
    /// Label every path of the tree, unchanged ones included, sorted by path.
    ///
    /// Paths whose state has no mapping do not stop the scan; they are all
    /// reported together in one [`ClassifyError::Inconsistent`].
    pub fn classify<S>(store: &S) -> Result<Vec<ChangeRecord>, ClassifyError>
    where
        S: VersionedTreeStore + ?Sized,
    {
        let mut records = Vec::new();
        let mut inconsistent = Vec::new();

        for entry in store.status()? {
            let status = match entry.state {
                PathState::Current => ChangeStatus::Unchanged,
                PathState::New => ChangeStatus::Added,
                PathState::Modified => ChangeStatus::Modified,
                PathState::Deleted => ChangeStatus::Removed,
                PathState::Conflicted
                | PathState::TypeChanged
                | PathState::Renamed => {
                    warn!(path = %entry.path, state = ?entry.state, "unmappable path state");
                    inconsistent.push(entry.path);
                    continue;
                }
            };
            records.push(ChangeRecord::new(entry.path, status));
        }

        if !inconsistent.is_empty() {
            inconsistent.sort();
            return Err(ClassifyError::Inconsistent {
                paths: inconsistent,
            });
        }

        records.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(
            total = records.len(),
            changed = records.iter().filter(|r| r.is_change()).count(),
            "classified working tree"
        );
        Ok(records)
    }

    /// Records to stage and commit when publishing.
    pub fn export_changes(records: &[ChangeRecord]) -> Vec<ChangeRecord> {
        records.iter().filter(|r| r.is_change()).cloned().collect()
    }

    /// Invert the labels for the apply direction.
    ///
    /// Only template files take part; anything else in the tree is ignored.
    pub fn import_plan(records: &[ChangeRecord]) -> ImportPlan {
        let mut plan = ImportPlan::default();
        for record in records {
            if !is_template_path(&record.path) {
                if record.is_change() {
                    debug!(path = %record.path, "ignoring non-template path");
                }
                continue;
            }
            match record.status {
                ChangeStatus::Unchanged => {}
                ChangeStatus::Added => plan.remove.push(record.path.clone()),
                ChangeStatus::Modified | ChangeStatus::Removed => {
                    plan.import.push(record.path.clone())
                }
            }
        }
        plan
    }

    /// Template files present in the last commit.
    pub fn tracked_templates(records: &[ChangeRecord]) -> Vec<String> {
        records
            .iter()
            .filter(|r| r.status != ChangeStatus::Added && is_template_path(&r.path))
            .map(|r| r.path.clone())
            .collect()
    }
}

fn is_template_path(path: &str) -> bool {
    Path::new(path)
        .extension()
        .is_some_and(|ext| ext == TEMPLATE_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GitError;
    use crate::git::{GitClient, PathStatus};
    use git2::Repository;

    struct StaticTree(Vec<PathStatus>);

    impl VersionedTreeStore for StaticTree {
        fn workdir(&self) -> &Path {
            Path::new("/")
        }
        fn head_commit(&self) -> Result<Option<String>, GitError> {
            Ok(None)
        }
        fn status(&self) -> Result<Vec<PathStatus>, GitError> {
            Ok(self.0.clone())
        }
        fn hard_reset(&self, _commit: &str) -> Result<(), GitError> {
            Ok(())
        }
        fn stage_all(&self) -> Result<(), GitError> {
            Ok(())
        }
        fn commit(&self, _message: &str) -> Result<String, GitError> {
            Ok(String::new())
        }
        fn push(&self) -> Result<(), GitError> {
            Ok(())
        }
    }

    fn entry(path: &str, state: PathState) -> PathStatus {
        PathStatus {
            path: path.into(),
            state,
        }
    }

    #[test]
    fn test_maps_states_and_sorts() {
        let tree = StaticTree(vec![
            entry("b.json", PathState::Modified),
            entry("a.json", PathState::Current),
            entry("d.json", PathState::Deleted),
            entry("c.json", PathState::New),
        ]);
        let records = ChangeClassifier::classify(&tree).unwrap();
        assert_eq!(
            records,
            vec![
                ChangeRecord::new("a.json", ChangeStatus::Unchanged),
                ChangeRecord::new("b.json", ChangeStatus::Modified),
                ChangeRecord::new("c.json", ChangeStatus::Added),
                ChangeRecord::new("d.json", ChangeStatus::Removed),
            ]
        );
    }

    #[test]
    fn test_reports_every_inconsistent_path() {
        let tree = StaticTree(vec![
            entry("ok.json", PathState::Modified),
            entry("z.json", PathState::Conflicted),
            entry("m.json", PathState::TypeChanged),
            entry("r.json", PathState::Renamed),
        ]);
        match ChangeClassifier::classify(&tree) {
            Err(ClassifyError::Inconsistent { paths }) => {
                assert_eq!(paths, vec!["m.json", "r.json", "z.json"]);
            }
            other => panic!("expected Inconsistent, got {other:?}"),
        }
    }

    #[test]
    fn test_import_plan_inverts_labels() {
        let records = vec![
            ChangeRecord::new("OS/Linux.json", ChangeStatus::Unchanged),
            ChangeRecord::new("OS/Stale.json", ChangeStatus::Added),
            ChangeRecord::new("OS/Edited.json", ChangeStatus::Modified),
            ChangeRecord::new("OS/Missing.json", ChangeStatus::Removed),
            ChangeRecord::new("README.md", ChangeStatus::Removed),
        ];
        let plan = ChangeClassifier::import_plan(&records);
        assert_eq!(plan.remove, vec!["OS/Stale.json"]);
        assert_eq!(plan.import, vec!["OS/Edited.json", "OS/Missing.json"]);
    }

    #[test]
    fn test_export_changes_drop_unchanged() {
        let records = vec![
            ChangeRecord::new("a.json", ChangeStatus::Unchanged),
            ChangeRecord::new("b.json", ChangeStatus::Added),
        ];
        let changes = ChangeClassifier::export_changes(&records);
        assert_eq!(changes, vec![ChangeRecord::new("b.json", ChangeStatus::Added)]);
    }

    #[test]
    fn test_unchanged_round_trip_yields_no_change() {
        let dir = tempfile::tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        let client = GitClient::open(dir.path(), "master").unwrap();
        std::fs::create_dir_all(dir.path().join("OS")).unwrap();
        std::fs::write(dir.path().join("OS/Linux.json"), "{\"a\": 1}").unwrap();
        client.stage_all().unwrap();
        client.commit("base").unwrap();

        // Regenerate identical content over the committed snapshot.
        std::fs::remove_file(dir.path().join("OS/Linux.json")).unwrap();
        std::fs::write(dir.path().join("OS/Linux.json"), "{\"a\": 1}").unwrap();

        let records = ChangeClassifier::classify(&client).unwrap();
        assert_eq!(records, vec![ChangeRecord::new("OS/Linux.json", ChangeStatus::Unchanged)]);
        assert!(ChangeClassifier::export_changes(&records).is_empty());
        assert!(ChangeClassifier::import_plan(&records).is_empty());
    }
}
