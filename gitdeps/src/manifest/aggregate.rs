//! Discovery and merging of per-module and per-plugin manifests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use glob::Pattern;
use tracing::{debug, info};

use super::model::{
    parse_dependency_manifest, DependencyBlob, DependencyFile, DependencyManifest, DependencyPack,
};
use crate::error::{SyncError, SyncResult};

/// A manifest found on disk together with the path prefix its file names
/// are relative to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredManifest {
    pub path: PathBuf,
    /// Workspace-relative directory (with trailing `/`) prepended to every
    /// file name in the manifest. Empty for module manifests.
    pub prefix: String,
}

/// Finds manifest files under `<Module>/Build` and
/// `<Module>/Plugins/**/Build`.
#[derive(Debug, Clone)]
pub struct ManifestDiscovery {
    manifest_pattern: Pattern,
    descriptor_pattern: Pattern,
}

impl ManifestDiscovery {
    /// # Arguments
    ///
    /// * `manifest_glob` - File name pattern of manifests (e.g. `*.gitdeps.xml`)
    /// * `descriptor_glob` - File name pattern marking a plugin root (e.g. `*.uplugin`)
    pub fn new(manifest_glob: &str, descriptor_glob: &str) -> SyncResult<Self> {
        let compile = |glob: &str| {
            Pattern::new(glob)
                .map_err(|e| SyncError::InvalidConfig(format!("bad pattern '{}': {}", glob, e)))
        };
        Ok(Self {
            manifest_pattern: compile(manifest_glob)?,
            descriptor_pattern: compile(descriptor_glob)?,
        })
    }

    /// List every manifest in the workspace, in a stable order.
    pub fn discover(&self, root: &Path) -> SyncResult<Vec<DiscoveredManifest>> {
        let mut found = Vec::new();

        for entry in sorted_entries(root)? {
            if !entry.is_dir() {
                continue;
            }
            self.collect_build_manifests(&entry.join("Build"), "", &mut found)?;

            let plugins = entry.join("Plugins");
            if plugins.is_dir() {
                self.walk_plugins(root, &plugins, &mut found)?;
            }
        }

        Ok(found)
    }

    fn walk_plugins(
        &self,
        root: &Path,
        dir: &Path,
        found: &mut Vec<DiscoveredManifest>,
    ) -> SyncResult<()> {
        let entries = sorted_entries(dir)?;

        let is_plugin_root = entries.iter().any(|path| {
            path.is_file()
                && file_name(path).is_some_and(|name| self.descriptor_pattern.matches(name))
        });

        if is_plugin_root {
            let prefix = relative_prefix(root, dir);
            let before = found.len();
            self.collect_build_manifests(&dir.join("Build"), &prefix, found)?;
            if found.len() > before {
                return Ok(());
            }
        }

        for path in entries.iter().filter(|p| p.is_dir()) {
            self.walk_plugins(root, path, found)?;
        }
        Ok(())
    }

    fn collect_build_manifests(
        &self,
        build_dir: &Path,
        prefix: &str,
        found: &mut Vec<DiscoveredManifest>,
    ) -> SyncResult<()> {
        if !build_dir.is_dir() {
            return Ok(());
        }

        for path in sorted_entries(build_dir)? {
            let matches = path.is_file()
                && file_name(&path).is_some_and(|name| self.manifest_pattern.matches(name));
            if matches {
                debug!(manifest = %path.display(), %prefix, "Found dependency manifest");
                found.push(DiscoveredManifest {
                    path,
                    prefix: prefix.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Non-hidden directory entries, sorted by path.
fn sorted_entries(dir: &Path) -> SyncResult<Vec<PathBuf>> {
    let read_err = |e| SyncError::ReadFailed {
        path: dir.to_path_buf(),
        source: e,
    };

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if file_name(&path).is_some_and(|name| !name.starts_with('.')) {
            entries.push(path);
        }
    }
    entries.sort();
    Ok(entries)
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

fn relative_prefix(root: &Path, dir: &Path) -> String {
    let relative = dir.strip_prefix(root).unwrap_or(dir);
    let mut prefix = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if !prefix.is_empty() {
        prefix.push('/');
    }
    prefix
}

/// Case-insensitive lookup key for a workspace-relative file name.
pub(crate) fn file_key(name: &str) -> String {
    name.replace('\\', "/").to_lowercase()
}

/// A pack plus the download policy of the manifest that declared it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackEntry {
    pub pack: DependencyPack,
    pub base_url: String,
    pub ignore_proxy: bool,
}

impl PackEntry {
    /// `<BaseUrl>/<RemotePath>/<Hash>`
    pub fn url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.pack.remote_path.trim_matches('/'),
            self.pack.hash
        )
    }
}

/// Every declared file, blob and pack of the workspace, merged.
#[derive(Debug, Clone, Default)]
pub struct TargetManifest {
    /// Keyed by lowercased file name.
    pub files: BTreeMap<String, DependencyFile>,
    pub blobs: HashMap<String, DependencyBlob>,
    pub packs: HashMap<String, PackEntry>,
}

impl TargetManifest {
    /// Merge one manifest. Entries already present are replaced.
    pub fn merge(&mut self, manifest: DependencyManifest, prefix: &str) {
        for mut file in manifest.files {
            file.name = format!("{}{}", prefix, file.name.replace('\\', "/"));
            file.hash.make_ascii_lowercase();
            self.files.insert(file_key(&file.name), file);
        }

        for mut blob in manifest.blobs {
            blob.hash.make_ascii_lowercase();
            blob.pack_hash.make_ascii_lowercase();
            self.blobs.insert(blob.hash.clone(), blob);
        }

        for mut pack in manifest.packs {
            pack.hash.make_ascii_lowercase();
            self.packs.insert(
                pack.hash.clone(),
                PackEntry {
                    pack,
                    base_url: manifest.base_url.clone(),
                    ignore_proxy: manifest.ignore_proxy,
                },
            );
        }
    }

    /// Check that every file resolves to a blob and every blob to a pack.
    pub fn validate(&self) -> SyncResult<()> {
        for file in self.files.values() {
            if !self.blobs.contains_key(&file.hash) {
                return Err(SyncError::InvalidManifest(format!(
                    "file {} references unknown blob {}",
                    file.name, file.hash
                )));
            }
        }
        for blob in self.blobs.values() {
            if !self.packs.contains_key(&blob.pack_hash) {
                return Err(SyncError::InvalidManifest(format!(
                    "blob {} references unknown pack {}",
                    blob.hash, blob.pack_hash
                )));
            }
        }
        Ok(())
    }

    /// Look up a declared file by name, ignoring case.
    pub fn file(&self, name: &str) -> Option<&DependencyFile> {
        self.files.get(&file_key(name))
    }

    /// Total compressed size of the packs the declared files live in.
    pub fn referenced_pack_bytes(&self) -> u64 {
        let mut seen = HashSet::new();
        self.files
            .values()
            .filter_map(|file| self.blobs.get(&file.hash))
            .filter(|blob| seen.insert(blob.pack_hash.as_str()))
            .filter_map(|blob| self.packs.get(&blob.pack_hash))
            .map(|entry| entry.pack.compressed_size)
            .sum()
    }
}

/// Discover, parse and merge every manifest in the workspace.
///
/// Any unreadable manifest aborts the whole aggregation.
pub fn aggregate_manifests(
    root: &Path,
    discovery: &ManifestDiscovery,
) -> SyncResult<TargetManifest> {
    let mut target = TargetManifest::default();
    let discovered = discovery.discover(root)?;

    for manifest in &discovered {
        let parsed = parse_dependency_manifest(&manifest.path)?;
        target.merge(parsed, &manifest.prefix);
    }

    target.validate()?;

    info!(
        manifests = discovered.len(),
        files = target.files.len(),
        blobs = target.blobs.len(),
        packs = target.packs.len(),
        "Aggregated dependency manifests"
    );
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manifest_xml(file: &str, hash: &str, pack: &str) -> String {
        DependencyManifest {
            files: vec![DependencyFile {
                name: file.to_string(),
                hash: hash.to_string(),
                is_executable: false,
            }],
            blobs: vec![DependencyBlob {
                hash: hash.to_string(),
                size: 4,
                pack_hash: pack.to_string(),
                pack_offset: 0,
            }],
            packs: vec![DependencyPack {
                hash: pack.to_string(),
                size: 4,
                compressed_size: 24,
                remote_path: "remote".to_string(),
            }],
            ..Default::default()
        }
        .to_xml()
        .unwrap()
    }

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn discovery() -> ManifestDiscovery {
        ManifestDiscovery::new("*.gitdeps.xml", "*.uplugin").unwrap()
    }

    #[test]
    fn test_discover_modules_and_plugins() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "Engine/Build/Commit.gitdeps.xml", "");
        write(root, "Engine/Build/notes.txt", "");
        write(root, "Engine/Build/.hidden.gitdeps.xml", "");
        write(root, "Engine/Plugins/Media/Foo/Foo.uplugin", "");
        write(root, "Engine/Plugins/Media/Foo/Build/Foo.gitdeps.xml", "");
        write(root, "Engine/Plugins/Media/Foo/Sub/Bar.uplugin", "");
        write(root, "Engine/Plugins/Media/Foo/Sub/Build/Bar.gitdeps.xml", "");
        write(root, "Game/Build/Game.gitdeps.xml", "");

        let found = discovery().discover(root).unwrap();
        let listed: Vec<(String, String)> = found
            .iter()
            .map(|m| {
                (
                    m.path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"),
                    m.prefix.clone(),
                )
            })
            .collect();

        assert_eq!(
            listed,
            vec![
                ("Engine/Build/Commit.gitdeps.xml".to_string(), String::new()),
                (
                    "Engine/Plugins/Media/Foo/Build/Foo.gitdeps.xml".to_string(),
                    "Engine/Plugins/Media/Foo/".to_string()
                ),
                ("Game/Build/Game.gitdeps.xml".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_plugin_without_manifests_recurses() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "Engine/Plugins/Outer/Outer.uplugin", "");
        write(root, "Engine/Plugins/Outer/Inner/Inner.uplugin", "");
        write(root, "Engine/Plugins/Outer/Inner/Build/Inner.gitdeps.xml", "");

        let found = discovery().discover(root).unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].prefix, "Engine/Plugins/Outer/Inner/");
    }

    #[test]
    fn test_aggregate_prefixes_plugin_files() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(
            root,
            "Engine/Build/Commit.gitdeps.xml",
            &manifest_xml("Engine/Binaries/a.bin", "AA11", "P1"),
        );
        write(root, "Engine/Plugins/Foo/Foo.uplugin", "");
        write(
            root,
            "Engine/Plugins/Foo/Build/Foo.gitdeps.xml",
            &manifest_xml("Binaries/foo.dll", "bb22", "p2"),
        );

        let target = aggregate_manifests(root, &discovery()).unwrap();

        assert_eq!(target.files.len(), 2);
        let plugin_file = target.file("engine/plugins/foo/binaries/FOO.dll").unwrap();
        assert_eq!(plugin_file.name, "Engine/Plugins/Foo/Binaries/foo.dll");
        assert_eq!(target.file("Engine/Binaries/a.bin").unwrap().hash, "aa11");
        assert!(target.blobs.contains_key("aa11"));
        assert!(target.packs.contains_key("p1"));
        assert_eq!(target.referenced_pack_bytes(), 48);
    }

    #[test]
    fn test_later_manifest_wins() {
        let mut target = TargetManifest::default();
        let first = DependencyManifest::from_xml(&manifest_xml("a.bin", "h1", "p1")).unwrap();
        let mut second = DependencyManifest::from_xml(&manifest_xml("A.BIN", "h2", "p2")).unwrap();
        second.base_url = "https://mirror.example.com".to_string();

        target.merge(first, "");
        target.merge(second, "");

        assert_eq!(target.files.len(), 1);
        assert_eq!(target.file("a.bin").unwrap().hash, "h2");
        assert_eq!(target.packs["p2"].base_url, "https://mirror.example.com");
        assert_eq!(
            target.packs["p2"].url(),
            "https://mirror.example.com/remote/p2"
        );
    }

    #[test]
    fn test_parse_failure_aborts() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(
            root,
            "Engine/Build/Good.gitdeps.xml",
            &manifest_xml("a.bin", "h1", "p1"),
        );
        write(root, "Engine/Build/Bad.gitdeps.xml", "<DependencyManifest><Files>");

        let result = aggregate_manifests(root, &discovery());
        assert!(matches!(result, Err(SyncError::ManifestParse { .. })));
    }

    #[test]
    fn test_validate_dangling_blob() {
        let mut target = TargetManifest::default();
        let mut manifest = DependencyManifest::from_xml(&manifest_xml("a.bin", "h1", "p1")).unwrap();
        manifest.blobs.clear();
        target.merge(manifest, "");

        assert!(matches!(
            target.validate(),
            Err(SyncError::InvalidManifest(_))
        ));
    }
}
