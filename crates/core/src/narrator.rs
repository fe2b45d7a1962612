//! Commit messages for published changes.

use std::fmt;

use crate::models::{ChangeRecord, ChangeStatus};
use crate::template::TEMPLATE_EXTENSION;

/// A commit message: an optional summary headline and one line per change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMessage {
    pub headline: Option<String>,
    pub lines: Vec<String>,
}

impl CommitMessage {
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CommitMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(headline) = &self.headline {
            write!(f, "{headline}\n\n")?;
        }
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Derives deterministic commit messages from a change list.
pub struct CommitNarrator;

impl CommitNarrator {
    /// Describe `records`. Unchanged records are ignored; `None` means there
    /// is nothing to commit.
    pub fn narrate(records: &[ChangeRecord]) -> Option<CommitMessage> {
        let changes: Vec<&ChangeRecord> = records.iter().filter(|r| r.is_change()).collect();
        let first = changes.first()?;

        let headline = (changes.len() > 1).then(|| {
            let kind = if changes.iter().all(|c| c.status == first.status) {
                plural(first.status)
            } else {
                "changes"
            };
            let mut headline = format!("Performed {} {kind}", changes.len());
            let common = common_parent(changes.iter().map(|c| c.path.as_str()));
            if !common.is_empty() {
                headline.push_str(&format!(" in {common} group"));
            }
            headline
        });

        let lines = changes
            .iter()
            .map(|c| format!("{} {}", verb(c.status), object_name(&c.path)))
            .collect();

        Some(CommitMessage { headline, lines })
    }
}

fn verb(status: ChangeStatus) -> &'static str {
    match status {
        ChangeStatus::Added => "Added",
        ChangeStatus::Modified => "Updated",
        ChangeStatus::Removed => "Removed",
        ChangeStatus::Unchanged => "Kept",
    }
}

fn plural(status: ChangeStatus) -> &'static str {
    match status {
        ChangeStatus::Added => "additions",
        ChangeStatus::Modified => "updates",
        ChangeStatus::Removed => "removals",
        ChangeStatus::Unchanged => "changes",
    }
}

/// File name without directory and template extension.
fn object_name(path: &str) -> &str {
    let file = path.rsplit('/').next().unwrap_or(path);
    file.strip_suffix(TEMPLATE_EXTENSION)
        .and_then(|stem| stem.strip_suffix('.'))
        .unwrap_or(file)
}

/// Longest directory prefix shared by all paths, `""` if none.
fn common_parent<'a>(paths: impl Iterator<Item = &'a str>) -> String {
    let mut common: Option<Vec<&str>> = None;
    for path in paths {
        let mut dirs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        dirs.pop();
        common = Some(match common {
            None => dirs,
            Some(prev) => prev
                .into_iter()
                .zip(dirs)
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a)
                .collect(),
        });
    }
    common.unwrap_or_default().join("/")
}
