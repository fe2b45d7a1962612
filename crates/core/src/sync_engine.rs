//! Template <-> Git synchronization engine.
//!
//! The [`SyncEngine`] drives the two directions:
//!
//! 1. **Publish**: export the remote templates over the last commit, commit
//!    whatever changed and push it.
//! 2. **Apply**: export the remote templates over the last commit, then make
//!    the remote side match the commit again. Templates the commit no longer
//!    has are removed; templates the commit holds differently are imported
//!    in dependency order.
//!
//! A lock flag prevents overlapping runs on the same engine.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::classifier::ChangeClassifier;
use crate::config::AppConfig;
use crate::errors::{GitError, SyncError};
use crate::exporter::TemplateExporter;
use crate::git::VersionedTreeStore;
use crate::models::{
    ApplyOutcome, BatchOutcome, ObjectOutcome, PublishOutcome, TemplateObject,
};
use crate::narrator::CommitNarrator;
use crate::remote::RemoteObjectApi;
use crate::resolver::{DependencyGraph, DependencyResolver};
use crate::template::{read_objects, stamp_for_import};

/// Reason recorded for dependencies that are not part of the import batch.
pub const EXTERNAL_DEPENDENCY: &str = "not part of this batch, assumed present on the remote";

/// The template synchronization engine.
pub struct SyncEngine<S> {
    config: AppConfig,
    store: S,
    remote: Arc<dyn RemoteObjectApi>,
    /// Atomic flag preventing overlapping runs.
    running: Arc<AtomicBool>,
    run_started_at: Mutex<Option<DateTime<Utc>>>,
}

impl<S: VersionedTreeStore> SyncEngine<S> {
    pub fn new(config: AppConfig, store: S, remote: Arc<dyn RemoteObjectApi>) -> Self {
        info!("initializing sync engine");
        Self {
            config,
            store,
            remote,
            running: Arc::new(AtomicBool::new(false)),
            run_started_at: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Check if a run is currently in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> Result<SyncLockGuard, SyncError> {
        let mut started = self
            .run_started_at
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::AlreadyRunning {
                started_at: started.map(|t| t.to_rfc3339()).unwrap_or_default(),
            });
        }
        *started = Some(Utc::now());
        Ok(SyncLockGuard(self.running.clone()))
    }

    /// Overwrite the working tree with a fresh export of the remote side.
    async fn regenerate(&self) -> Result<(), SyncError> {
        let workdir = self.store.workdir();
        TemplateExporter::new(self.remote.as_ref(), &self.config.remote)
            .export_all(workdir)
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Publish
    // -----------------------------------------------------------------------

    /// Record the current remote templates in the repository.
    ///
    /// A commit is only created when at least one file changed.
    pub async fn publish(&self) -> Result<PublishOutcome, SyncError> {
        let _guard = self.acquire()?;
        let mut outcome = PublishOutcome {
            started_at: Utc::now().to_rfc3339(),
            ..Default::default()
        };

        info!("publish: exporting remote templates");
        self.regenerate().await?;

        let records = ChangeClassifier::classify(&self.store)?;
        let changes = ChangeClassifier::export_changes(&records);
        match CommitNarrator::narrate(&changes) {
            None => info!("publish: no changes found"),
            Some(message) => {
                info!(count = changes.len(), "publish: committing changes");
                self.store.stage_all()?;
                let sha = self.store.commit(&message.render())?;
                outcome.commit = Some(sha);

                if self.config.git.push {
                    self.store.push()?;
                    outcome.pushed = true;
                } else {
                    info!("publish: push disabled, commit kept locally");
                }
            }
        }

        outcome.changes = changes;
        outcome.completed_at = Some(Utc::now().to_rfc3339());
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Apply
    // -----------------------------------------------------------------------

    /// Make the remote templates match the last commit.
    ///
    /// Setup, classification and ordering problems abort the run. Failures
    /// of single templates are recorded in the outcome and the run goes on.
    pub async fn apply(&self) -> Result<ApplyOutcome, SyncError> {
        let _guard = self.acquire()?;
        let mut outcome = ApplyOutcome {
            started_at: Utc::now().to_rfc3339(),
            ..Default::default()
        };

        let checkpoint = self
            .store
            .head_commit()?
            .ok_or_else(|| GitError::RefNotFound("HEAD".into()))?;
        outcome.checkpoint = Some(checkpoint.clone());

        info!(%checkpoint, "apply: exporting remote templates");
        self.regenerate().await?;

        let records = ChangeClassifier::classify(&self.store)?;
        let plan = ChangeClassifier::import_plan(&records);
        if plan.is_empty() {
            info!("apply: remote already matches the repository");
        }

        // The fresh export is the only copy of the templates to remove, so
        // read them before the reset.
        let workdir = self.store.workdir().to_path_buf();
        let removals = self.read_batch(&workdir, &plan.remove, &mut outcome.removals);

        self.store.hard_reset(&checkpoint)?;

        if !removals.is_empty() {
            // A template exported into several groups may only have lost
            // one of its files.
            let tracked = self.tracked_names(&workdir, &ChangeClassifier::tracked_templates(&records));
            let mut names = Vec::new();
            for name in removals.into_keys() {
                if tracked.contains(&name) {
                    info!(template = %name, "template is still tracked, not removing");
                    outcome
                        .removals
                        .push(ObjectOutcome::skipped(name, "still tracked in another group"));
                } else {
                    names.push(name);
                }
            }
            if !names.is_empty() {
                self.remove(&names, &mut outcome.removals).await;
            }
        }

        let imports = self.read_batch(&workdir, &plan.import, &mut outcome.imports);
        if !imports.is_empty() {
            let graph: DependencyGraph = imports
                .iter()
                .map(|(name, object)| (name.clone(), object.dependencies.clone()))
                .collect();
            let resolution = DependencyResolver::resolve(&graph)?;

            for name in &resolution.external {
                warn!(dependency = %name, "dependency is not part of the import batch");
                outcome
                    .imports
                    .push(ObjectOutcome::skipped(name, EXTERNAL_DEPENDENCY));
            }

            self.import_waves(&resolution.waves, &imports, &mut outcome.imports)
                .await;
            outcome.waves = resolution.waves;
        }

        outcome.completed_at = Some(Utc::now().to_rfc3339());
        info!(
            removed = outcome.removals.applied(),
            imported = outcome.imports.applied(),
            skipped = outcome.removals.skipped() + outcome.imports.skipped(),
            failed = outcome.removals.failed() + outcome.imports.failed(),
            "apply completed"
        );
        Ok(outcome)
    }

    /// Read the templates of `paths`. Unreadable files are recorded as
    /// failures; a template found in several files is kept once.
    fn read_batch(
        &self,
        workdir: &Path,
        paths: &[String],
        batch: &mut BatchOutcome,
    ) -> BTreeMap<String, TemplateObject> {
        let mut objects = BTreeMap::new();
        for path in paths {
            match read_objects(&workdir.join(path)) {
                Ok(found) => {
                    for object in found {
                        debug!(template = %object.name, path = %path, "read template");
                        objects.entry(object.name.clone()).or_insert(object);
                    }
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "cannot read template file");
                    batch.push(ObjectOutcome::failed(path, e));
                }
            }
        }
        objects
    }

    /// Names defined by the committed template files in `paths`.
    fn tracked_names(&self, workdir: &Path, paths: &[String]) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for path in paths {
            match read_objects(&workdir.join(path)) {
                Ok(found) => names.extend(found.into_iter().map(|o| o.name)),
                Err(e) => debug!(path = %path, error = %e, "skipping unreadable tracked file"),
            }
        }
        names
    }

    /// Remove `names` from the remote side. A failing batch call is retried
    /// per name so one bad template does not hide the others.
    async fn remove(&self, names: &[String], batch: &mut BatchOutcome) {
        if !self.config.sync.remove_deleted {
            for name in names {
                info!(template = %name, "removal disabled, keeping template");
                batch.push(ObjectOutcome::skipped(name, "removal disabled"));
            }
            return;
        }

        info!(count = names.len(), "removing templates");
        match self.remote.remove_objects(names).await {
            Ok(removed) => {
                let removed: BTreeSet<String> = removed.into_iter().collect();
                for name in names {
                    batch.push(removal_outcome(name, removed.contains(name)));
                }
            }
            Err(e) => {
                warn!(error = %e, "batch removal failed, retrying one by one");
                for name in names {
                    match self.remote.remove_objects(std::slice::from_ref(name)).await {
                        Ok(removed) => batch.push(removal_outcome(name, !removed.is_empty())),
                        Err(e) => {
                            warn!(template = %name, error = %e, "removal failed");
                            batch.push(ObjectOutcome::failed(name, e));
                        }
                    }
                }
            }
        }
    }

    /// Import the waves in order. Members of one wave run concurrently up to
    /// `sync.max_concurrent_imports`; a file holding several templates is
    /// imported once.
    async fn import_waves(
        &self,
        waves: &[BTreeSet<String>],
        objects: &BTreeMap<String, TemplateObject>,
        batch: &mut BatchOutcome,
    ) {
        let limit = self.config.sync.max_concurrent_imports.max(1);
        let mut imported: HashMap<PathBuf, Result<(), String>> = HashMap::new();

        for (index, wave) in waves.iter().enumerate() {
            info!(wave = index, size = wave.len(), "importing wave");

            let mut pending: BTreeMap<&Path, (&str, Vec<&str>)> = BTreeMap::new();
            for name in wave {
                let Some(object) = objects.get(name) else {
                    continue;
                };
                match imported.get(&object.source_path) {
                    Some(Ok(())) => batch.push(ObjectOutcome::applied(name)),
                    Some(Err(e)) => batch.push(ObjectOutcome::failed(name, e)),
                    None => pending
                        .entry(object.source_path.as_path())
                        .or_insert_with(|| (object.payload.as_str(), Vec::new()))
                        .1
                        .push(name),
                }
            }

            let mut results: Vec<(&Path, Vec<&str>, Result<(), SyncError>)> =
                stream::iter(pending)
                    .map(|(path, (payload, names))| async move {
                        let result = self.import_payload(payload).await;
                        (path, names, result)
                    })
                    .buffer_unordered(limit)
                    .collect()
                    .await;
            results.sort_by(|a, b| a.0.cmp(b.0));

            for (path, names, result) in results {
                match &result {
                    Ok(()) => {
                        for name in &names {
                            info!(template = %name, "imported");
                            batch.push(ObjectOutcome::applied(*name));
                        }
                    }
                    Err(e) => {
                        for name in &names {
                            warn!(template = %name, error = %e, "import failed");
                            batch.push(ObjectOutcome::failed(*name, e));
                        }
                    }
                }
                imported.insert(path.to_path_buf(), result.map_err(|e| e.to_string()));
            }
        }
    }

    async fn import_payload(&self, payload: &str) -> Result<(), SyncError> {
        let stamped = stamp_for_import(payload, Utc::now())?;
        self.remote
            .import_object(&stamped, &self.config.import_rules)
            .await?;
        Ok(())
    }
}

fn removal_outcome(name: &str, removed: bool) -> ObjectOutcome {
    if removed {
        info!(template = %name, "removed");
        ObjectOutcome::applied(name)
    } else {
        debug!(template = %name, "template already absent");
        ObjectOutcome::skipped(name, "not present on the remote")
    }
}

// ---------------------------------------------------------------------------
// Sync lock RAII guard
// ---------------------------------------------------------------------------

/// Drop guard that resets the `running` flag to `false`.
struct SyncLockGuard(Arc<AtomicBool>);

impl Drop for SyncLockGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
