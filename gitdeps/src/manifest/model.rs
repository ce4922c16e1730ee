//! Manifest value types and their XML representation.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// CDN used when a manifest does not name its own `BaseUrl`.
pub const DEFAULT_BASE_URL: &str = "http://cdn.unrealengine.com/dependencies";

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

/// A file the workspace must contain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DependencyFile {
    /// Workspace-relative path using forward slashes.
    #[serde(rename = "@Name")]
    pub name: String,
    /// Hash of the file contents; names the blob that holds them.
    #[serde(rename = "@Hash")]
    pub hash: String,
    #[serde(rename = "@IsExecutable", default)]
    pub is_executable: bool,
}

/// An uncompressed byte range inside a pack.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DependencyBlob {
    #[serde(rename = "@Hash")]
    pub hash: String,
    #[serde(rename = "@Size")]
    pub size: u64,
    #[serde(rename = "@PackHash")]
    pub pack_hash: String,
    /// Offset of the first byte within the pack's decompressed stream.
    #[serde(rename = "@PackOffset")]
    pub pack_offset: u64,
}

/// A downloadable, gzip-compressed concatenation of blobs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DependencyPack {
    #[serde(rename = "@Hash")]
    pub hash: String,
    /// Decompressed size.
    #[serde(rename = "@Size")]
    pub size: u64,
    #[serde(rename = "@CompressedSize")]
    pub compressed_size: u64,
    #[serde(rename = "@RemotePath")]
    pub remote_path: String,
}

/// All declared dependencies of one module or plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyManifest {
    pub base_url: String,
    pub ignore_proxy: bool,
    pub files: Vec<DependencyFile>,
    pub blobs: Vec<DependencyBlob>,
    pub packs: Vec<DependencyPack>,
}

impl Default for DependencyManifest {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ignore_proxy: false,
            files: Vec::new(),
            blobs: Vec::new(),
            packs: Vec::new(),
        }
    }
}

/// Local record of one synchronized file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WorkingFile {
    #[serde(rename = "@Name")]
    pub name: String,
    /// Hash of the content on disk when `timestamp` was taken. Empty when
    /// unknown.
    #[serde(rename = "@Hash", default)]
    pub hash: String,
    /// Hash the last sync wanted this file to have.
    #[serde(rename = "@ExpectedHash", default)]
    pub expected_hash: String,
    /// Modification time (ns since the Unix epoch) that `hash` was computed
    /// for. Zero while a download is pending.
    #[serde(rename = "@Timestamp", default)]
    pub timestamp: u64,
}

impl WorkingFile {
    /// A placeholder for a file that still has to be downloaded.
    pub fn pending(name: impl Into<String>, expected_hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hash: String::new(),
            expected_hash: expected_hash.into(),
            timestamp: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.timestamp == 0
    }
}

/// Ordered collection of working files; the only state persisted between
/// runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingManifest {
    pub files: Vec<WorkingFile>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct FileList {
    #[serde(rename = "File", default)]
    items: Vec<DependencyFile>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct BlobList {
    #[serde(rename = "Blob", default)]
    items: Vec<DependencyBlob>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct PackList {
    #[serde(rename = "Pack", default)]
    items: Vec<DependencyPack>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct WorkingFileList {
    #[serde(rename = "File", default)]
    items: Vec<WorkingFile>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ManifestDocument {
    #[serde(rename = "@BaseUrl", default = "default_base_url")]
    base_url: String,
    #[serde(rename = "@IgnoreProxy", default)]
    ignore_proxy: bool,
    #[serde(rename = "Files", default)]
    files: FileList,
    #[serde(rename = "Blobs", default)]
    blobs: BlobList,
    #[serde(rename = "Packs", default)]
    packs: PackList,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct WorkingDocument {
    #[serde(rename = "Files", default)]
    files: WorkingFileList,
}

fn to_xml<T: Serialize>(root: &str, value: &T) -> Result<String, String> {
    let mut body = String::new();
    let mut serializer = quick_xml::se::Serializer::with_root(&mut body, Some(root))
        .map_err(|e| e.to_string())?;
    serializer.indent(' ', 2);
    value.serialize(serializer).map_err(|e| e.to_string())?;

    let mut xml = String::with_capacity(XML_DECLARATION.len() + body.len() + 1);
    xml.push_str(XML_DECLARATION);
    xml.push_str(&body);
    xml.push('\n');
    Ok(xml)
}

impl DependencyManifest {
    /// Parse a `DependencyManifest` XML document.
    pub fn from_xml(xml: &str) -> Result<Self, String> {
        let doc: ManifestDocument = quick_xml::de::from_str(xml).map_err(|e| e.to_string())?;
        Ok(Self {
            base_url: doc.base_url,
            ignore_proxy: doc.ignore_proxy,
            files: doc.files.items,
            blobs: doc.blobs.items,
            packs: doc.packs.items,
        })
    }

    /// Render as a `DependencyManifest` XML document.
    pub fn to_xml(&self) -> Result<String, String> {
        let doc = ManifestDocument {
            base_url: self.base_url.clone(),
            ignore_proxy: self.ignore_proxy,
            files: FileList {
                items: self.files.clone(),
            },
            blobs: BlobList {
                items: self.blobs.clone(),
            },
            packs: PackList {
                items: self.packs.clone(),
            },
        };
        to_xml("DependencyManifest", &doc)
    }
}

impl WorkingManifest {
    pub fn from_xml(xml: &str) -> Result<Self, String> {
        let doc: WorkingDocument = quick_xml::de::from_str(xml).map_err(|e| e.to_string())?;
        Ok(Self {
            files: doc.files.items,
        })
    }

    pub fn to_xml(&self) -> Result<String, String> {
        let doc = WorkingDocument {
            files: WorkingFileList {
                items: self.files.clone(),
            },
        };
        to_xml("WorkingManifest", &doc)
    }
}

/// Read and parse a declared manifest from disk.
pub fn parse_dependency_manifest(path: &Path) -> SyncResult<DependencyManifest> {
    let xml = fs::read_to_string(path).map_err(|e| SyncError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    DependencyManifest::from_xml(&xml).map_err(|reason| SyncError::ManifestParse {
        path: path.to_path_buf(),
        reason,
    })
}
