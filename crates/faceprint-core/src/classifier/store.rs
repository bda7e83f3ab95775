//! Transactional persistence of the trained classifier.
//!
//! The head, its label order and the training metadata share one JSON file.
//! A save writes it to a temporary file, reads it back, validates it and
//! commits with a single rename, so the file on disk is always either the
//! previous artifact or the new one.

use super::head::ClassifierHead;
use super::{TrainedClassifier, TrainingError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ARTIFACT_FILE: &str = "classifier.json";

#[derive(Serialize, Deserialize)]
struct Artifact {
    artifact_id: String,
    trained_at: DateTime<Utc>,
    epochs: usize,
    samples: usize,
    labels: Vec<String>,
    head: ClassifierHead,
}

#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.dir.join(ARTIFACT_FILE)
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(format!(".{ARTIFACT_FILE}.tmp"))
    }

    /// Persist `classifier`, replacing the current artifact only once the
    /// new file has been read back and validated.
    pub fn save(&self, classifier: &TrainedClassifier) -> Result<(), TrainingError> {
        classifier.validate()?;
        fs::create_dir_all(&self.dir)?;

        let tmp = self.temp_path();
        let artifact = Artifact {
            artifact_id: classifier.artifact_id.clone(),
            trained_at: classifier.trained_at,
            epochs: classifier.epochs,
            samples: classifier.samples,
            labels: classifier.labels.clone(),
            head: classifier.head.clone(),
        };
        let verified = fs::write(&tmp, serde_json::to_vec(&artifact)?)
            .map_err(TrainingError::from)
            .and_then(|()| read_artifact(&tmp))
            .and_then(|v| {
                if v.artifact_id == classifier.artifact_id {
                    Ok(v)
                } else {
                    Err(TrainingError::InvalidArtifact(format!(
                        "read back artifact {} while saving {}",
                        v.artifact_id, classifier.artifact_id
                    )))
                }
            });
        let verified = match verified {
            Ok(v) => v,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };

        fs::rename(&tmp, self.artifact_path())?;
        tracing::info!(
            artifact = %verified.artifact_id,
            classes = verified.labels.len(),
            path = %self.dir.display(),
            "classifier persisted"
        );
        Ok(())
    }

    /// Load the persisted artifact. `Ok(None)` when nothing was ever saved.
    /// A leftover temporary file from an interrupted save is ignored.
    pub fn load(&self) -> Result<Option<TrainedClassifier>, TrainingError> {
        let path = self.artifact_path();
        if !path.exists() {
            return Ok(None);
        }
        read_artifact(&path).map(Some)
    }
}

fn read_artifact(path: &Path) -> Result<TrainedClassifier, TrainingError> {
    let artifact: Artifact = serde_json::from_slice(&fs::read(path)?)?;
    let classifier = TrainedClassifier {
        artifact_id: artifact.artifact_id,
        labels: artifact.labels,
        head: artifact.head,
        trained_at: artifact.trained_at,
        epochs: artifact.epochs,
        samples: artifact.samples,
    };
    classifier.validate()?;
    Ok(classifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn classifier(id: &str, labels: &[&str]) -> TrainedClassifier {
        let mut rng = StdRng::seed_from_u64(11);
        TrainedClassifier {
            artifact_id: id.into(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            head: ClassifierHead::new(4, 3, labels.len(), &mut rng),
            trained_at: Utc::now(),
            epochs: 2,
            samples: 10,
        }
    }

    #[test]
    fn test_empty_dir_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ModelStore::new(dir.path()).load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let c = classifier("one", &["alice", "bob"]);
        store.save(&c).unwrap();
        assert_eq!(store.load().unwrap().unwrap(), c);
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_replacement_overwrites_previous() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        store.save(&classifier("one", &["a", "b"])).unwrap();
        store.save(&classifier("two", &["a", "b", "c"])).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.artifact_id, "two");
        assert_eq!(loaded.labels.len(), 3);
    }

    #[test]
    fn test_invalid_artifact_not_saved_and_old_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        store.save(&classifier("one", &["a", "b"])).unwrap();

        let mut bad = classifier("two", &["a", "b"]);
        bad.labels.push("c".into());
        assert!(store.save(&bad).is_err());
        assert_eq!(store.load().unwrap().unwrap().artifact_id, "one");
    }

    #[test]
    fn test_interrupted_save_keeps_previous() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        store.save(&classifier("one", &["x", "y"])).unwrap();

        // A save that died after writing part of its temporary file.
        fs::write(store.temp_path(), b"{\"artifact_id\":\"two\",\"lab").unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.artifact_id, "one");
        assert_eq!(loaded.labels, vec!["x", "y"]);

        store.save(&classifier("three", &["x", "y", "z"])).unwrap();
        assert_eq!(store.load().unwrap().unwrap().artifact_id, "three");
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_failed_commit_keeps_previous() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        store.save(&classifier("one", &["x", "y"])).unwrap();

        // The temporary path is occupied by a directory, so the write fails.
        fs::create_dir(store.temp_path()).unwrap();
        assert!(store.save(&classifier("two", &["x", "y", "z"])).is_err());
        assert_eq!(store.load().unwrap().unwrap().artifact_id, "one");
    }

    #[test]
    fn test_corrupt_artifact_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        fs::write(store.artifact_path(), b"{}").unwrap();
        assert!(store.load().is_err());
    }
}
