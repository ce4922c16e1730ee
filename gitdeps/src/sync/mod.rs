//! The sync engine.
//!
//! A run reconciles the workspace with the declared manifests:
//!
//! 1. Aggregate manifests and load the working state, finishing any
//!    interrupted save and removing partial downloads.
//! 2. Refresh recorded hashes from disk (`refresh`).
//! 3. Classify every file (`plan`) and apply the overwrite policy.
//! 4. Delete stale files, checkpoint the working state, download.
//! 5. Record the downloaded files, checkpoint again, purge the cache and
//!    mark executables.
//!
//! The working state written in step 4 is always a valid resume point: a
//! file whose download did not finish is recorded as pending and fetched
//! again next run.

mod plan;
mod refresh;

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::cache::{PackCache, PurgeResult};
use crate::cancel::CancellationFlag;
use crate::config::SyncConfig;
use crate::download::{plan_jobs, DownloadScheduler, HttpPackSource, PackSource, SchedulerOptions};
use crate::error::{SyncError, SyncResult};
use crate::ignore::{ExcludePredicate, IgnoreRules};
use crate::manifest::{
    aggregate_manifests, file_key, file_timestamp, remove_partial_downloads, DependencyFile,
    ManifestDiscovery, TargetManifest, WorkingManifest, WorkingStateStore,
};
use crate::platform::{native_executable_bit, ExecutableBit};
use crate::report::{DeclinePrompter, Prompter, Reporter};

pub use plan::SyncPlan;
pub use refresh::{refresh_working_state, LocalFiles};

/// Outcome of a sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub files_kept: usize,
    pub files_downloaded: usize,
    /// Files removed because no manifest declares them any more.
    pub files_removed: usize,
    /// Locally modified files that were left alone.
    pub files_skipped: usize,
    pub packs_downloaded: usize,
    pub packs_from_cache: usize,
    pub bytes_downloaded: u64,
    pub purge: Option<PurgeResult>,
    pub dry_run: bool,
}

impl SyncSummary {
    /// Whether the run changed (or would change) nothing.
    pub fn is_noop(&self) -> bool {
        self.files_downloaded == 0 && self.files_removed == 0
    }
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.dry_run { "would update" } else { "updated" };
        write!(
            f,
            "{} {} file(s), removed {}, kept {}",
            verb, self.files_downloaded, self.files_removed, self.files_kept
        )?;
        if self.files_skipped > 0 {
            write!(f, ", skipped {} modified", self.files_skipped)?;
        }
        if self.packs_downloaded + self.packs_from_cache > 0 {
            write!(
                f,
                " ({} pack(s) downloaded, {} from cache)",
                self.packs_downloaded, self.packs_from_cache
            )?;
        }
        Ok(())
    }
}

/// Excluded folders plus ignore-file rules.
struct Exclusions<'p> {
    /// Lowercased `/<folder>/` needles.
    folders: Vec<String>,
    ignore: Box<dyn ExcludePredicate + 'p>,
}

impl<'p> Exclusions<'p> {
    fn new(folders: &[String], ignore: Box<dyn ExcludePredicate + 'p>) -> Self {
        let folders = folders
            .iter()
            .map(|f| f.replace('\\', "/").trim_matches('/').to_lowercase())
            .filter(|f| !f.is_empty())
            .map(|f| format!("/{}/", f))
            .collect();
        Self { folders, ignore }
    }

    /// Whether the sync must not touch `name`.
    fn is_protected(&self, name: &str) -> bool {
        let haystack = format!("/{}", name.replace('\\', "/").to_lowercase());
        self.folders.iter().any(|f| haystack.contains(f.as_str()))
            || self.ignore.is_excluded_file(name)
    }
}

/// Runs syncs for one workspace.
pub struct Synchronizer<'a> {
    config: SyncConfig,
    reporter: &'a dyn Reporter,
    prompter: Box<dyn Prompter + 'a>,
    source: Option<Box<dyn PackSource + 'a>>,
    executable: Box<dyn ExecutableBit + 'a>,
    ignore: Option<Box<dyn ExcludePredicate + 'a>>,
    cancel: CancellationFlag,
}

impl<'a> Synchronizer<'a> {
    /// A synchronizer that downloads over HTTP, declines every overwrite
    /// prompt and reads the workspace's ignore file.
    pub fn new(config: SyncConfig, reporter: &'a dyn Reporter) -> Self {
        Self {
            config,
            reporter,
            prompter: Box::new(DeclinePrompter),
            source: None,
            executable: native_executable_bit(),
            ignore: None,
            cancel: CancellationFlag::new(),
        }
    }

    pub fn with_prompter(mut self, prompter: Box<dyn Prompter + 'a>) -> Self {
        self.prompter = prompter;
        self
    }

    /// Fetch packs from `source` instead of HTTP.
    pub fn with_source(mut self, source: Box<dyn PackSource + 'a>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_executable_bit(mut self, executable: Box<dyn ExecutableBit + 'a>) -> Self {
        self.executable = executable;
        self
    }

    /// Use `ignore` instead of the workspace's ignore file.
    pub fn with_ignore(mut self, ignore: Box<dyn ExcludePredicate + 'a>) -> Self {
        self.ignore = Some(ignore);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Synchronize the workspace.
    ///
    /// # Errors
    ///
    /// Manifest errors abort before anything is changed. Filesystem and
    /// download errors abort the run, leaving the last written working
    /// state valid for the next run.
    pub fn run(&mut self) -> SyncResult<SyncSummary> {
        self.config.validate()?;
        let root = self.config.root_dir.clone();

        self.reporter.status("Reading dependency manifests");
        let discovery =
            ManifestDiscovery::new(&self.config.manifest_glob, &self.config.descriptor_glob)?;
        let target = aggregate_manifests(&root, &discovery)?;

        let store = WorkingStateStore::new(&root, &self.config.state_file_name);
        let previous = self.load_working_state(&store)?;

        self.reporter.status("Checking files");
        let local = refresh_working_state(&root, previous, &target, &self.cancel)?;

        let ignore: Box<dyn ExcludePredicate + 'a> = match self.ignore.take() {
            Some(ignore) => ignore,
            None => Box::new(IgnoreRules::load(&self.config.ignore_file_path())?),
        };
        let exclusions = Exclusions::new(&self.config.excluded_folders, ignore);

        let filtered: Vec<&DependencyFile> = target
            .files
            .values()
            .filter(|file| !exclusions.is_protected(&file.name))
            .collect();

        let mut plan = SyncPlan::classify(&filtered, local, |name| exclusions.is_protected(name));
        plan.resolve_tampered(self.config.overwrite, self.prompter.as_ref());
        let replaced = plan.replaced();

        let mut summary = SyncSummary {
            files_kept: plan.keep.len(),
            files_downloaded: plan.downloads.len(),
            files_removed: plan
                .deletes
                .iter()
                .filter(|f| !replaced.contains(&file_key(&f.name)))
                .count(),
            files_skipped: plan.tampered_kept.len(),
            dry_run: self.config.dry_run,
            ..Default::default()
        };

        for file in &plan.tampered_kept {
            self.reporter
                .message(&format!("Skipping {} (modified locally)", file.name));
        }

        if self.config.dry_run {
            self.report_dry_run(&plan, &replaced);
            return Ok(summary);
        }

        self.delete_files(&root, &plan)?;

        let mut working = WorkingManifest {
            files: plan.next_working_files(),
        };
        store.save(&working)?;

        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        if !plan.downloads.is_empty() {
            self.download(&root, &target, &plan, &mut summary)?;
            self.record_downloads(&root, &mut working, &plan)?;
            store.save(&working)?;
        }

        summary.purge = self.purge_cache(&target);
        self.apply_executable_bits(&root, &filtered);

        info!(%summary, "Sync complete");
        Ok(summary)
    }

    fn load_working_state(&self, store: &WorkingStateStore) -> SyncResult<Option<WorkingManifest>> {
        if self.config.dry_run {
            return store.load();
        }

        store.recover()?;
        let previous = store.load()?;
        if let Some(manifest) = &previous {
            let removed = remove_partial_downloads(&self.config.root_dir, manifest)?;
            if removed > 0 {
                info!(removed, "Removed partial downloads from an interrupted run");
            }
        }
        Ok(previous)
    }

    fn report_dry_run(&self, plan: &SyncPlan, replaced: &HashSet<String>) {
        for file in &plan.downloads {
            let verb = if replaced.contains(&file_key(&file.name)) {
                "Update"
            } else {
                "Add"
            };
            self.reporter.message(&format!("{} {}", verb, file.name));
        }
        for file in &plan.deletes {
            if !replaced.contains(&file_key(&file.name)) {
                self.reporter.message(&format!("Remove {}", file.name));
            }
        }
    }

    fn delete_files(&self, root: &Path, plan: &SyncPlan) -> SyncResult<()> {
        if plan.deletes.is_empty() {
            return Ok(());
        }
        self.reporter
            .status(&format!("Removing {} stale file(s)", plan.deletes.len()));

        for file in &plan.deletes {
            let path = root.join(&file.name);
            match fs::remove_file(&path) {
                Ok(()) => debug!(file = %file.name, "Deleted file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(SyncError::DeleteFailed { path, source: e }),
            }
            remove_empty_parents(root, &path);
        }
        Ok(())
    }

    fn download(
        &self,
        root: &Path,
        target: &TargetManifest,
        plan: &SyncPlan,
        summary: &mut SyncSummary,
    ) -> SyncResult<()> {
        let jobs = plan_jobs(target, root, &plan.downloads)?;
        self.reporter.status(&format!(
            "Downloading {} file(s) from {} pack(s)",
            plan.downloads.len(),
            jobs.len()
        ));

        let http;
        let source: &dyn PackSource = match &self.source {
            Some(source) => source.as_ref(),
            None => {
                http = HttpPackSource::new(
                    self.config.proxy.as_deref(),
                    self.config.connect_timeout,
                )?;
                &http
            }
        };
        let cache = self.config.cache_dir.as_ref().map(PackCache::new);
        let options = SchedulerOptions {
            threads: self.config.threads,
            max_retries: self.config.max_retries,
            retry_delay: self.config.retry_delay,
        };

        let stats = DownloadScheduler::new(source, cache.as_ref(), self.reporter, options)
            .with_cancellation(self.cancel.clone())
            .run(jobs)?;

        summary.packs_downloaded = stats.packs_downloaded;
        summary.packs_from_cache = stats.packs_from_cache;
        summary.bytes_downloaded = stats.bytes_downloaded;
        Ok(())
    }

    /// Mark every downloaded file as verified at its current mtime.
    fn record_downloads(
        &self,
        root: &Path,
        working: &mut WorkingManifest,
        plan: &SyncPlan,
    ) -> SyncResult<()> {
        let downloaded: HashSet<String> = plan.downloads.iter().map(|f| file_key(&f.name)).collect();

        for file in working
            .files
            .iter_mut()
            .filter(|f| downloaded.contains(&file_key(&f.name)))
        {
            let path = root.join(&file.name);
            let metadata = fs::metadata(&path).map_err(|e| SyncError::ReadFailed {
                path: path.clone(),
                source: e,
            })?;
            file.hash = file.expected_hash.clone();
            file.timestamp = file_timestamp(&metadata);
        }
        Ok(())
    }

    fn purge_cache(&self, target: &TargetManifest) -> Option<PurgeResult> {
        let dir = self.config.cache_dir.as_ref()?;
        let desired =
            (target.referenced_pack_bytes() as f64 * self.config.cache_size_multiplier) as u64;

        match PackCache::new(dir).purge(desired, self.config.cache_max_age) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(error = %e, "Failed to purge pack cache");
                None
            }
        }
    }

    fn apply_executable_bits(&self, root: &Path, files: &[&DependencyFile]) {
        if !self.executable.can_set_executable_bit() {
            return;
        }
        for file in files.iter().filter(|f| f.is_executable) {
            let path = root.join(&file.name);
            if !path.is_file() {
                continue;
            }
            if let Err(e) = self.executable.set_executable_bit(&path) {
                warn!(file = %file.name, error = %e, "Failed to set executable bit");
            }
        }
    }
}

/// Remove directories left empty by a deletion, up to (not including) the
/// workspace root.
fn remove_empty_parents(root: &Path, path: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        if fs::remove_dir(dir).is_err() {
            break;
        }
        debug!(dir = %dir.display(), "Removed empty directory");
        current = dir.parent();
    }
}
