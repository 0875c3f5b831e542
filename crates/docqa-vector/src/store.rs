use std::fs;
use std::path::{Path, PathBuf};

use docqa_core::config::ChunkingConfig;
use docqa_core::error::{Error, Result};

use crate::format::{self, Manifest};
use crate::index::VectorIndex;
use crate::snapshot::IndexSnapshot;

const VERSIONS_DIR: &str = "versions";
const CURRENT_FILE: &str = "CURRENT";
pub const STATS_FILE: &str = "stats.json";

/// Versioned index storage rooted at `index_dir`:
///
/// ```text
/// index_dir/
///   CURRENT               id of the active version
///   stats.json            summary of the last build
///   versions/<id>/        vectors.bin, chunks.jsonl, manifest.json
/// ```
///
/// Versions are built in a temp dir next to their final place and renamed in,
/// then `CURRENT` is replaced by rename. Readers never see a partial version.
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

    pub fn root(&self) -> &Path { &self.root }

    pub fn version_dir(&self, version: &str) -> PathBuf { self.root.join(VERSIONS_DIR).join(version) }

    pub fn stats_path(&self) -> PathBuf { self.root.join(STATS_FILE) }

    /// Persist `index` as a new version and make it current. Returns the
    /// version id. Publishing identical content again reuses the same version.
    pub fn publish(&self, index: &VectorIndex, embedder_id: &str, chunking: ChunkingConfig) -> Result<String> {
        let encoded = format::encode(index, embedder_id, chunking)?;
        let versions = self.root.join(VERSIONS_DIR);
        fs::create_dir_all(&versions).map_err(|e| Error::io(&versions, e))?;

        let final_dir = versions.join(&encoded.version_id);
        if final_dir.is_dir() {
            tracing::info!(version = %encoded.version_id, "identical index version already present");
        } else {
            let tmp = tempfile::Builder::new()
                .prefix(".build-")
                .tempdir_in(&versions)
                .map_err(|e| Error::io(&versions, e))?;
            format::write(tmp.path(), &encoded)?;
            fs::rename(tmp.path(), &final_dir).map_err(|e| Error::io(&final_dir, e))?;
            tracing::info!(version = %encoded.version_id, rows = index.len(), "wrote index version");
        }
        self.flip_current(&encoded.version_id)?;
        Ok(encoded.version_id)
    }

    /// Atomically point `CURRENT` at `version`.
    pub fn flip_current(&self, version: &str) -> Result<()> {
        let tmp = self.root.join(format!(".{CURRENT_FILE}.tmp"));
        fs::write(&tmp, format!("{version}\n")).map_err(|e| Error::io(&tmp, e))?;
        let current = self.root.join(CURRENT_FILE);
        fs::rename(&tmp, &current).map_err(|e| Error::io(&current, e))?;
        tracing::debug!(version, "flipped active index");
        Ok(())
    }

    pub fn current_version(&self) -> Result<Option<String>> {
        let path = self.root.join(CURRENT_FILE);
        match fs::read_to_string(&path) {
            Ok(s) => {
                let id = s.trim();
                if id.is_empty() {
                    return Err(Error::corruption(format!("{} is empty", path.display())));
                }
                Ok(Some(id.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(&path, e)),
        }
    }

    pub fn load_current(&self) -> Result<IndexSnapshot> {
        let version = self
            .current_version()?
            .ok_or_else(|| Error::corruption(format!("no index published under {}", self.root.display())))?;
        self.load_version(&version)
    }

    pub fn load_version(&self, version: &str) -> Result<IndexSnapshot> {
        let dir = self.version_dir(version);
        if !dir.is_dir() {
            return Err(Error::corruption(format!("index version {version} not found at {}", dir.display())));
        }
        let (index, manifest): (VectorIndex, Manifest) = format::read(&dir)?;
        tracing::info!(version, rows = index.len(), dim = index.dim(), embedder = %manifest.embedder_id, "loaded index");
        Ok(IndexSnapshot { version: version.to_string(), manifest, index })
    }
}
