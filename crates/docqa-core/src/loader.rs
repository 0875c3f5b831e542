use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::Document;

const TEXT_EXTENSIONS: &[&str] = &["txt", "md"];

/// Loads pre-extracted text documents from a directory tree.
#[derive(Default)]
pub struct DocumentLoader;

impl DocumentLoader {
    pub fn new() -> Self { Self }

    /// Every `.txt`/`.md` file under `dir`, sorted by path. `doc_id` is the
    /// file stem and must be unique across the corpus.
    pub fn load_directory(&self, dir: &Path) -> Result<Vec<Document>> {
        if !dir.is_dir() {
            return Err(Error::validation(format!("documents directory not found: {}", dir.display())));
        }
        let files = self.list_text_files(dir);
        if files.is_empty() {
            tracing::warn!(dir = %dir.display(), "no text documents found");
            return Ok(vec![]);
        }
        let mut seen: HashMap<String, PathBuf> = HashMap::new();
        let mut docs = Vec::with_capacity(files.len());
        for path in files {
            let doc_id = Self::extract_doc_id(&path)?;
            if let Some(prev) = seen.insert(doc_id.clone(), path.clone()) {
                return Err(Error::validation(format!(
                    "duplicate doc_id '{doc_id}': {} and {}",
                    prev.display(),
                    path.display()
                )));
            }
            let text = Self::read_file_content(&path)?;
            tracing::debug!(doc_id = %doc_id, path = %path.display(), chars = text.len(), "loaded document");
            docs.push(Document::from_text(doc_id, path, text));
        }
        tracing::info!(dir = %dir.display(), documents = docs.len(), "loaded documents");
        Ok(docs)
    }

    fn read_file_content(path: &Path) -> Result<String> {
        let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
        match String::from_utf8(bytes) {
            Ok(s) => Ok(s),
            Err(e) => Ok(String::from_utf8_lossy(e.as_bytes()).into_owned()),
        }
    }

    fn extract_doc_id(path: &Path) -> Result<String> {
        path.file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::validation(format!("cannot derive doc_id from {}", path.display())))
    }

    fn list_text_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .filter(|p| {
                p.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect();
        files.sort();
        files
    }
}
