//! Integration tests for a complete sync.
//!
//! These tests drive the `Synchronizer` end to end against a temporary
//! workspace, serving packs from memory instead of a CDN:
//! - manifests on disk → aggregation → diff → download → extraction
//! - working-state checkpoints and crash recovery
//! - the pack cache, retries and the overwrite policy
//!
//! Run with: `cargo test --test sync_integration`

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use filetime::FileTime;
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;

use gitdeps::checksum::hash_bytes;
use gitdeps::config::{OverwriteMode, SyncConfig};
use gitdeps::download::{PackJob, PackSource, PackStream};
use gitdeps::manifest::{
    DependencyBlob, DependencyFile, DependencyManifest, DependencyPack, WorkingFile,
    WorkingManifest, WorkingStateStore,
};
use gitdeps::report::{NullReporter, Prompter};
use gitdeps::{SyncError, SyncSummary, Synchronizer};

// ============================================================================
// Helper Functions
// ============================================================================

const MODULE_MANIFEST: &str = "Engine/Build/Engine.gitdeps.xml";

/// One declared file.
#[derive(Clone)]
struct Declared {
    name: &'static str,
    content: Vec<u8>,
    executable: bool,
}

fn file(name: &'static str, content: &[u8]) -> Declared {
    Declared {
        name,
        content: content.to_vec(),
        executable: false,
    }
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Build a manifest where each group of files becomes one pack. Identical
/// contents share a blob. Returns the manifest and the compressed packs.
fn build_manifest(groups: &[Vec<Declared>]) -> (DependencyManifest, HashMap<String, Vec<u8>>) {
    let mut manifest = DependencyManifest {
        base_url: "http://cdn.test/deps".to_string(),
        ..Default::default()
    };
    let mut packs = HashMap::new();

    for group in groups {
        let mut stream = Vec::new();
        let mut blobs: Vec<(String, u64, u64)> = Vec::new();

        for declared in group {
            let hash = hash_bytes(&declared.content);
            if !blobs.iter().any(|(h, _, _)| *h == hash) {
                blobs.push((hash.clone(), stream.len() as u64, declared.content.len() as u64));
                stream.extend_from_slice(&declared.content);
            }
            manifest.files.push(DependencyFile {
                name: declared.name.to_string(),
                hash,
                is_executable: declared.executable,
            });
        }

        let pack_hash = hash_bytes(&stream);
        let compressed = gzip(&stream);
        for (hash, offset, size) in blobs {
            manifest.blobs.push(DependencyBlob {
                hash,
                size,
                pack_hash: pack_hash.clone(),
                pack_offset: offset,
            });
        }
        manifest.packs.push(DependencyPack {
            hash: pack_hash.clone(),
            size: stream.len() as u64,
            compressed_size: compressed.len() as u64,
            remote_path: "Test".to_string(),
        });
        packs.insert(pack_hash, compressed);
    }

    (manifest, packs)
}

/// Serves packs from memory, optionally failing the first requests.
#[derive(Default)]
struct MemorySource {
    packs: HashMap<String, Vec<u8>>,
    fail_first: usize,
    requests: AtomicUsize,
}

impl MemorySource {
    fn new(packs: HashMap<String, Vec<u8>>) -> Self {
        Self {
            packs,
            ..Default::default()
        }
    }

    fn failing_first(mut self, count: usize) -> Self {
        self.fail_first = count;
        self
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl PackSource for MemorySource {
    fn open(&self, job: &PackJob) -> gitdeps::SyncResult<PackStream> {
        let attempt = self.requests.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(SyncError::DownloadFailed {
                url: job.url.clone(),
                reason: "connection reset".to_string(),
            });
        }
        match self.packs.get(&job.pack_hash) {
            Some(body) => Ok(Box::new(io::Cursor::new(body.clone()))),
            None => Err(SyncError::HttpStatus {
                url: job.url.clone(),
                status: 404,
            }),
        }
    }
}

struct AcceptAll;

impl Prompter for AcceptAll {
    fn confirm_overwrite(&self, _files: &[String]) -> bool {
        true
    }
}

/// A temporary workspace with one module manifest.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        Self { dir }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root().join(name)
    }

    fn write_manifest(&self, relative: &str, manifest: &DependencyManifest) {
        let path = self.path(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, manifest.to_xml().unwrap()).unwrap();
    }

    /// Declare `groups` and return a source serving their packs.
    fn declare(&self, groups: &[Vec<Declared>]) -> MemorySource {
        let (manifest, packs) = build_manifest(groups);
        self.write_manifest(MODULE_MANIFEST, &manifest);
        MemorySource::new(packs)
    }

    fn config(&self) -> SyncConfig {
        SyncConfig::new(self.root())
            .with_threads(2)
            .with_retry_delay(Duration::from_millis(1))
    }

    fn sync_with(
        &self,
        config: SyncConfig,
        source: &MemorySource,
    ) -> gitdeps::SyncResult<SyncSummary> {
        Synchronizer::new(config, &NullReporter)
            .with_source(Box::new(source))
            .run()
    }

    fn sync(&self, source: &MemorySource) -> SyncSummary {
        self.sync_with(self.config(), source).unwrap()
    }

    fn read(&self, name: &str) -> Vec<u8> {
        fs::read(self.path(name)).unwrap()
    }

    /// Overwrite a file and move its mtime so the change is noticed.
    fn tamper(&self, name: &str, content: &[u8]) {
        let path = self.path(name);
        fs::write(&path, content).unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();
    }

    fn working_state(&self) -> WorkingManifest {
        WorkingStateStore::new(self.root(), ".dependencies-state")
            .load()
            .unwrap()
            .expect("working state written")
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_single_file_is_downloaded() {
    let ws = Workspace::new();
    let source = ws.declare(&[vec![file("Engine/Binaries/a.dll", b"AAAA")]]);

    let summary = ws.sync(&source);

    assert_eq!(ws.read("Engine/Binaries/a.dll"), b"AAAA");
    assert_eq!(summary.files_downloaded, 1);
    assert_eq!(summary.packs_downloaded, 1);
    assert_eq!(source.requests(), 1);

    let state = ws.working_state();
    assert_eq!(state.files.len(), 1);
    assert_eq!(state.files[0].hash, hash_bytes(b"AAAA"));
    assert_eq!(state.files[0].expected_hash, hash_bytes(b"AAAA"));
    assert!(state.files[0].timestamp > 0);
}

#[test]
fn test_file_already_present_is_adopted() {
    let ws = Workspace::new();
    let source = ws.declare(&[vec![file("Engine/Binaries/a.dll", b"AAAA")]]);
    fs::create_dir_all(ws.path("Engine/Binaries")).unwrap();
    fs::write(ws.path("Engine/Binaries/a.dll"), b"AAAA").unwrap();

    let summary = ws.sync(&source);

    assert_eq!(summary.files_kept, 1);
    assert_eq!(summary.files_downloaded, 0);
    assert_eq!(source.requests(), 0);
}

#[test]
fn test_tampered_file_is_kept_by_default() {
    let ws = Workspace::new();
    let source = ws.declare(&[vec![file("Engine/Binaries/a.dll", b"AAAA")]]);
    ws.sync(&source);
    ws.tamper("Engine/Binaries/a.dll", b"local edit");

    let summary = ws.sync(&source);

    assert_eq!(summary.files_skipped, 1);
    assert_eq!(summary.files_downloaded, 0);
    assert_eq!(ws.read("Engine/Binaries/a.dll"), b"local edit");
    assert_eq!(source.requests(), 1);

    // Still reported as modified on the next run.
    assert_eq!(ws.sync(&source).files_skipped, 1);
}

#[test]
fn test_tampered_file_is_overwritten_when_forced() {
    let ws = Workspace::new();
    let source = ws.declare(&[vec![file("Engine/Binaries/a.dll", b"AAAA")]]);
    ws.sync(&source);
    ws.tamper("Engine/Binaries/a.dll", b"local edit");

    let summary = ws
        .sync_with(ws.config().with_overwrite(OverwriteMode::Force), &source)
        .unwrap();

    assert_eq!(summary.files_skipped, 0);
    assert_eq!(summary.files_downloaded, 1);
    assert_eq!(ws.read("Engine/Binaries/a.dll"), b"AAAA");
}

#[test]
fn test_tampered_file_is_overwritten_when_confirmed() {
    let ws = Workspace::new();
    let source = ws.declare(&[vec![file("Engine/Binaries/a.dll", b"AAAA")]]);
    ws.sync(&source);
    ws.tamper("Engine/Binaries/a.dll", b"local edit");

    let summary = Synchronizer::new(
        ws.config().with_overwrite(OverwriteMode::Prompt),
        &NullReporter,
    )
    .with_source(Box::new(&source))
    .with_prompter(Box::new(AcceptAll))
    .run()
    .unwrap();

    assert_eq!(summary.files_downloaded, 1);
    assert_eq!(ws.read("Engine/Binaries/a.dll"), b"AAAA");
}

#[test]
fn test_dropped_file_is_deleted() {
    let ws = Workspace::new();
    let source = ws.declare(&[vec![
        file("Engine/Binaries/keep.dll", b"KEEP"),
        file("Engine/Binaries/Old/drop.dll", b"DROP"),
    ]]);
    ws.sync(&source);
    assert!(ws.path("Engine/Binaries/Old/drop.dll").exists());

    let source = ws.declare(&[vec![file("Engine/Binaries/keep.dll", b"KEEP")]]);
    let summary = ws.sync(&source);

    assert_eq!(summary.files_removed, 1);
    assert_eq!(summary.files_kept, 1);
    assert!(!ws.path("Engine/Binaries/Old/drop.dll").exists());
    assert!(!ws.path("Engine/Binaries/Old").exists());
    assert!(ws.path("Engine/Binaries/keep.dll").exists());
    assert_eq!(ws.working_state().files.len(), 1);
}

#[test]
fn test_shared_blob_is_fetched_once() {
    let ws = Workspace::new();
    let source = ws.declare(&[vec![
        file("Engine/Binaries/Win64/c.dll", b"SHARED"),
        file("Engine/Binaries/Linux/c.dll", b"SHARED"),
    ]]);

    let summary = ws.sync(&source);

    assert_eq!(source.requests(), 1);
    assert_eq!(summary.files_downloaded, 2);
    assert_eq!(ws.read("Engine/Binaries/Win64/c.dll"), b"SHARED");
    assert_eq!(ws.read("Engine/Binaries/Linux/c.dll"), b"SHARED");
}

#[test]
fn test_updated_file_is_replaced() {
    let ws = Workspace::new();
    let source = ws.declare(&[vec![file("Engine/Binaries/a.dll", b"v1")]]);
    ws.sync(&source);

    let source = ws.declare(&[vec![file("Engine/Binaries/a.dll", b"v2")]]);
    let summary = ws.sync(&source);

    assert_eq!(summary.files_downloaded, 1);
    assert_eq!(summary.files_removed, 0);
    assert_eq!(ws.read("Engine/Binaries/a.dll"), b"v2");
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_second_run_is_a_noop() {
    let ws = Workspace::new();
    let source = ws.declare(&[
        vec![file("Engine/a.bin", b"a"), file("Engine/b.bin", b"b")],
        vec![file("Engine/c.bin", b"c")],
    ]);
    ws.sync(&source);
    let requests = source.requests();

    let summary = ws.sync(&source);

    assert!(summary.is_noop());
    assert_eq!(summary.files_kept, 3);
    assert_eq!(source.requests(), requests);
}

#[test]
fn test_classification_does_not_depend_on_thread_count() {
    let run = |threads: usize| {
        let ws = Workspace::new();
        let source = ws.declare(&[
            vec![file("Engine/a.bin", b"a"), file("Engine/b.bin", b"b")],
            vec![file("Engine/c.bin", b"c"), file("Engine/d.bin", b"d")],
            vec![file("Engine/e.bin", b"e")],
        ]);
        ws.sync_with(ws.config().with_threads(threads), &source).unwrap();
        ws.tamper("Engine/a.bin", b"edited");

        let source = ws.declare(&[
            vec![file("Engine/a.bin", b"a2"), file("Engine/b.bin", b"b")],
            vec![file("Engine/c.bin", b"c2")],
        ]);
        let mut summary = ws
            .sync_with(ws.config().with_threads(threads), &source)
            .unwrap();
        summary.bytes_downloaded = 0;
        summary.purge = None;
        summary
    };

    let single = run(1);
    assert_eq!(single.files_skipped, 1);
    assert_eq!(single.files_downloaded, 1);
    assert_eq!(single.files_removed, 2);
    assert_eq!(run(4), single);
    assert_eq!(run(8), single);
}

#[test]
fn test_corrupt_cache_entry_is_refetched() {
    let ws = Workspace::new();
    let source = ws.declare(&[vec![file("Engine/a.bin", b"pristine")]]);
    ws.sync(&source);

    let cache_root = ws.path(".git/gitdeps");
    let pack_hash = hash_bytes(b"pristine");
    let entry = cache_root.join(&pack_hash[..2]).join(&pack_hash);
    assert!(entry.is_file());
    fs::write(&entry, gzip(b"poisoned")).unwrap();
    fs::remove_file(ws.path("Engine/a.bin")).unwrap();

    let summary = ws.sync(&source);

    assert_eq!(summary.packs_downloaded, 1);
    assert_eq!(summary.packs_from_cache, 0);
    assert_eq!(ws.read("Engine/a.bin"), b"pristine");
    assert_eq!(source.requests(), 2);
}

#[test]
fn test_cached_pack_is_reused() {
    let ws = Workspace::new();
    let source = ws.declare(&[vec![file("Engine/a.bin", b"from cache")]]);
    ws.sync(&source);
    fs::remove_file(ws.path("Engine/a.bin")).unwrap();

    let summary = ws.sync(&source);

    assert_eq!(summary.packs_from_cache, 1);
    assert_eq!(source.requests(), 1);
    assert_eq!(ws.read("Engine/a.bin"), b"from cache");
}

#[test]
fn test_interrupted_run_is_recovered() {
    let ws = Workspace::new();
    let source = ws.declare(&[vec![file("Engine/a.bin", b"AAAA")]]);

    // A crash after staging the state file and mid-download.
    let store = WorkingStateStore::new(ws.root(), ".dependencies-state");
    let staged = WorkingManifest {
        files: vec![WorkingFile::pending("Engine/a.bin", hash_bytes(b"AAAA"))],
    };
    fs::write(store.temp_path(), staged.to_xml().unwrap()).unwrap();
    fs::create_dir_all(ws.path("Engine")).unwrap();
    fs::write(ws.path("Engine/a.bin.incoming"), b"AA").unwrap();

    let summary = ws.sync(&source);

    assert_eq!(summary.files_downloaded, 1);
    assert!(!store.temp_path().exists());
    assert!(!ws.path("Engine/a.bin.incoming").exists());
    assert_eq!(ws.read("Engine/a.bin"), b"AAAA");
}

#[test]
fn test_transient_failures_are_retried() {
    let ws = Workspace::new();
    let source = ws
        .declare(&[vec![file("Engine/a.bin", b"AAAA")]])
        .failing_first(3);

    let summary = ws.sync(&source);

    assert_eq!(summary.files_downloaded, 1);
    assert_eq!(source.requests(), 4);
}

#[test]
fn test_permanent_failure_leaves_resumable_state() {
    let ws = Workspace::new();
    ws.declare(&[vec![file("Engine/a.bin", b"AAAA")]]);
    let source = MemorySource::default();

    let result = ws.sync_with(ws.config().with_max_retries(1), &source);

    match result {
        Err(SyncError::DownloadsIncomplete { last_error, .. }) => {
            assert!(last_error.contains("404"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    let state = ws.working_state();
    assert_eq!(state.files.len(), 1);
    assert!(state.files[0].is_pending());
    assert!(!ws.path("Engine/a.bin").exists());
}

// ============================================================================
// Options
// ============================================================================

#[test]
fn test_dry_run_changes_nothing() {
    let ws = Workspace::new();
    let source = ws.declare(&[vec![file("Engine/a.bin", b"AAAA")]]);

    let summary = ws
        .sync_with(ws.config().with_dry_run(true), &source)
        .unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.files_downloaded, 1);
    assert_eq!(source.requests(), 0);
    assert!(!ws.path("Engine/a.bin").exists());
    assert!(!ws.path(".dependencies-state").exists());
}

#[test]
fn test_excluded_folder_is_left_alone() {
    let ws = Workspace::new();
    let source = ws.declare(&[vec![
        file("Engine/Binaries/Win64/a.dll", b"win"),
        file("Engine/Binaries/Linux/a.so", b"linux"),
    ]]);

    let summary = ws
        .sync_with(ws.config().with_excluded_folder("Linux"), &source)
        .unwrap();

    assert_eq!(summary.files_downloaded, 1);
    assert!(ws.path("Engine/Binaries/Win64/a.dll").exists());
    assert!(!ws.path("Engine/Binaries/Linux/a.so").exists());
}

#[test]
fn test_ignored_file_is_not_deleted() {
    let ws = Workspace::new();
    let source = ws.declare(&[vec![
        file("Engine/a.bin", b"a"),
        file("Engine/Local/b.bin", b"b"),
    ]]);
    ws.sync(&source);
    fs::write(ws.path(".gitdepsignore"), "# hand managed\n/Engine/Local/\n").unwrap();

    let source = ws.declare(&[vec![file("Engine/a.bin", b"a")]]);
    let summary = ws.sync(&source);

    assert_eq!(summary.files_removed, 0);
    assert!(ws.path("Engine/Local/b.bin").exists());
    assert_eq!(ws.working_state().files.len(), 2);
}

#[test]
fn test_plugin_files_are_prefixed() {
    let ws = Workspace::new();
    fs::create_dir_all(ws.path("Engine/Plugins/Editor/Foo")).unwrap();
    fs::write(ws.path("Engine/Plugins/Editor/Foo/Foo.uplugin"), "{}").unwrap();
    let (manifest, packs) = build_manifest(&[vec![file("Binaries/foo.dll", b"FOO")]]);
    ws.write_manifest("Engine/Plugins/Editor/Foo/Build/Foo.gitdeps.xml", &manifest);
    let source = MemorySource::new(packs);

    ws.sync(&source);

    assert_eq!(ws.read("Engine/Plugins/Editor/Foo/Binaries/foo.dll"), b"FOO");
}

#[cfg(unix)]
#[test]
fn test_executable_bit_is_set() {
    use std::os::unix::fs::PermissionsExt;

    let ws = Workspace::new();
    let mut tool = file("Engine/Binaries/tool", b"#!/bin/sh\n");
    tool.executable = true;
    let source = ws.declare(&[vec![tool, file("Engine/Binaries/data.bin", b"data")]]);

    ws.sync(&source);

    let mode = |name: &str| fs::metadata(ws.path(name)).unwrap().permissions().mode();
    assert_eq!(mode("Engine/Binaries/tool") & 0o111, 0o111);
    assert_eq!(mode("Engine/Binaries/data.bin") & 0o111, 0);
}

#[test]
fn test_invalid_manifest_aborts_before_changes() {
    let ws = Workspace::new();
    fs::create_dir_all(ws.path("Engine/Build")).unwrap();
    fs::write(ws.path(MODULE_MANIFEST), "<DependencyManifest><Files>").unwrap();
    fs::write(ws.path("Engine/stray.bin"), b"x").unwrap();

    let result = ws.sync_with(ws.config(), &MemorySource::default());

    assert!(matches!(result, Err(SyncError::ManifestParse { .. })));
    assert!(!ws.path(".dependencies-state").exists());
}
