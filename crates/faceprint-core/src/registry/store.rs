//! One image file per label plus an `index.json` holding enrollment order.

use super::RegistryError;
use std::fs;
use std::path::{Path, PathBuf};

pub const INDEX_FILE: &str = "index.json";
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Reduce a label to a safe file stem.
///
/// Path separators become spaces, whitespace runs become `_`, anything
/// outside `[A-Za-z0-9._-]` is dropped and leading/trailing `.`/`_` are
/// trimmed. An empty result is rejected.
pub fn sanitize_label(label: &str) -> Result<String, RegistryError> {
    let spaced: String = label
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_').to_string();
    if cleaned.is_empty() {
        return Err(RegistryError::InvalidLabel(label.to_string()));
    }
    Ok(cleaned)
}

/// An image on disk and the label it enrolls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub label: String,
    pub path: PathBuf,
}

/// Directory-backed image store.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    /// Open (creating if needed) the store directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stored images in enrollment order.
    ///
    /// Files missing from the index (copied in by hand) follow the indexed
    /// ones in file-name order.
    pub fn list(&self) -> Result<Vec<StoredImage>, RegistryError> {
        let mut on_disk: Vec<StoredImage> = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() || !has_allowed_extension(&path) {
                continue;
            }
            let Some(label) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            on_disk.push(StoredImage {
                label: label.to_string(),
                path,
            });
        }
        on_disk.sort_by(|a, b| a.path.cmp(&b.path));

        let mut ordered = Vec::with_capacity(on_disk.len());
        for label in self.read_index()? {
            if let Some(pos) = on_disk.iter().position(|s| s.label == label) {
                ordered.push(on_disk.remove(pos));
            }
        }
        ordered.extend(on_disk);
        Ok(ordered)
    }

    pub fn find(&self, label: &str) -> Option<PathBuf> {
        self.files_for(label).ok()?.into_iter().next()
    }

    /// Every image file stored under `label`, whatever the case of its
    /// extension.
    fn files_for(&self, label: &str) -> Result<Vec<PathBuf>, RegistryError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file()
                && has_allowed_extension(&path)
                && path.file_stem().and_then(|s| s.to_str()) == Some(label)
            {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Write `bytes` as the image for `label`, replacing any previous one.
    ///
    /// The file is written next to its destination and renamed into place.
    pub fn save(&self, label: &str, bytes: &[u8], extension: &str) -> Result<PathBuf, RegistryError> {
        let target = self.dir.join(format!("{label}.{extension}"));
        let tmp = self.dir.join(format!(".{label}.{extension}.tmp"));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &target)?;

        for stale in self.files_for(label)?.into_iter().filter(|p| *p != target) {
            fs::remove_file(&stale)?;
        }

        let mut index = self.read_index()?;
        if !index.iter().any(|l| l == label) {
            index.push(label.to_string());
            self.write_index(&index)?;
        }
        tracing::debug!(label, path = %target.display(), "stored image");
        Ok(target)
    }

    /// Delete the image for `label`. Returns `false` when nothing was stored.
    pub fn remove(&self, label: &str) -> Result<bool, RegistryError> {
        let files = self.files_for(label)?;
        let removed = !files.is_empty();
        for path in files {
            fs::remove_file(&path)?;
        }

        let mut index = self.read_index()?;
        let before = index.len();
        index.retain(|l| l != label);
        if index.len() != before {
            self.write_index(&index)?;
        }
        Ok(removed)
    }

    fn read_index(&self) -> Result<Vec<String>, RegistryError> {
        let path = self.dir.join(INDEX_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let json = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&json)?)
    }

    fn write_index(&self, index: &[String]) -> Result<(), RegistryError> {
        let path = self.dir.join(INDEX_FILE);
        let tmp = self.dir.join(format!(".{INDEX_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(index)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn has_allowed_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| ALLOWED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
