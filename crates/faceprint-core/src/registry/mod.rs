//! Enrolled identities, published as immutable generation-tagged snapshots.
//!
//! Writers (`add`, `remove`, `reload`) are serialized by one mutex and
//! publish a fresh `Arc<Snapshot>` only after the whole gallery has been
//! rebuilt. Readers clone the current `Arc` and keep using it for as long
//! as they like; they never observe a half-built gallery.

pub mod store;

use crate::codec::{self, CodecError};
use crate::detector::{DetectionStrategy, DetectorError};
use crate::encoder::EncoderError;
use crate::pipeline::Pipeline;
use crate::types::{DescriptorKind, Identity};
use image::ImageFormat;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;

pub use store::{sanitize_label, ImageStore, StoredImage};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid label: {0:?}")]
    InvalidLabel(String),
    #[error("identity not found: {0}")]
    NotFound(String),
    #[error("no face detected in enrollment image")]
    NoFaceDetected,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error("storage: {0}")]
    Io(#[from] std::io::Error),
    #[error("index: {0}")]
    Index(#[from] serde_json::Error),
    #[error("image encoding: {0}")]
    Image(#[from] image::ImageError),
}

/// Immutable view of the registry at one generation.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub generation: u64,
    /// Loaded labels in enrollment order.
    pub labels: Vec<String>,
    galleries: BTreeMap<DescriptorKind, Vec<Identity>>,
}

impl Snapshot {
    pub fn gallery(&self, kind: DescriptorKind) -> &[Identity] {
        self.galleries.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// File-backed identity registry.
pub struct IdentityRegistry {
    store: ImageStore,
    pipeline: Arc<Pipeline>,
    strategy: DetectionStrategy,
    current: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
}

impl IdentityRegistry {
    /// Open the registry and scan the store.
    ///
    /// A failed scan leaves the registry empty and is logged, not returned.
    pub fn open(store: ImageStore, pipeline: Arc<Pipeline>, strategy: DetectionStrategy) -> Self {
        let registry = Self {
            store,
            pipeline,
            strategy,
            current: RwLock::new(Arc::new(Snapshot::default())),
            writer: Mutex::new(()),
        };
        match registry.reload() {
            Ok(n) => tracing::info!(identities = n, dir = %registry.store.dir().display(), "registry loaded"),
            Err(e) => tracing::warn!(error = %e, "registry scan failed, starting empty"),
        }
        registry
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.snapshot().labels.clone()
    }

    /// Rebuild every gallery from the store and publish the result.
    /// Returns the number of loaded labels.
    pub fn reload(&self) -> Result<usize, RegistryError> {
        let _guard = self.writer.lock();
        self.rebuild()
    }

    /// Enroll `label` from `bytes`, replacing any previous image.
    ///
    /// Nothing is persisted unless a face is found and encodes with every
    /// configured encoder.
    pub fn add(&self, label: &str, bytes: &[u8]) -> Result<u64, RegistryError> {
        let label = sanitize_label(label)?;
        let image = self.pipeline.prepare(bytes)?;
        let located = self.pipeline.locate(&image, self.strategy)?;
        let bbox = located.boxes.first().ok_or(RegistryError::NoFaceDetected)?;
        for encoder in self.pipeline.encoders.iter() {
            encoder.encode_one(&image, bbox)?;
        }

        let (payload, extension) = match codec::extension_for(bytes) {
            Some(ext) => (bytes.to_vec(), ext),
            None => {
                let mut png = Cursor::new(Vec::new());
                image.as_rgb().write_to(&mut png, ImageFormat::Png)?;
                (png.into_inner(), "png")
            }
        };

        let _guard = self.writer.lock();
        self.store.save(&label, &payload, extension)?;
        self.rebuild()?;
        let snapshot = self.snapshot();
        tracing::info!(%label, generation = snapshot.generation, "identity enrolled");
        Ok(snapshot.generation)
    }

    /// Remove `label` and publish the shrunken registry.
    pub fn remove(&self, label: &str) -> Result<u64, RegistryError> {
        let label = sanitize_label(label)?;
        let _guard = self.writer.lock();
        if !self.store.remove(&label)? {
            return Err(RegistryError::NotFound(label));
        }
        self.rebuild()?;
        let generation = self.snapshot().generation;
        tracing::info!(%label, generation, "identity removed");
        Ok(generation)
    }

    /// Raw bytes of every stored image, in enrollment order.
    pub fn source_images(&self) -> Result<Vec<(String, Vec<u8>)>, RegistryError> {
        self.store
            .list()?
            .into_iter()
            .map(|s| Ok((s.label, std::fs::read(&s.path)?)))
            .collect()
    }

    /// Caller holds `writer`.
    fn rebuild(&self) -> Result<usize, RegistryError> {
        let stored = self.store.list()?;
        let mut labels = Vec::with_capacity(stored.len());
        let mut galleries: BTreeMap<DescriptorKind, Vec<Identity>> = BTreeMap::new();

        for item in stored {
            match self.encode_stored(&item) {
                Ok(identities) => {
                    for identity in identities {
                        galleries.entry(identity.descriptor.kind).or_default().push(identity);
                    }
                    labels.push(item.label);
                }
                Err(e) => tracing::warn!(
                    label = %item.label,
                    path = %item.path.display(),
                    error = %e,
                    "skipping stored image"
                ),
            }
        }

        let generation = self.current.read().generation + 1;
        let count = labels.len();
        let snapshot = Arc::new(Snapshot {
            generation,
            labels,
            galleries,
        });
        *self.current.write() = snapshot;
        tracing::debug!(generation, identities = count, "published registry snapshot");
        Ok(count)
    }

    fn encode_stored(&self, item: &StoredImage) -> Result<Vec<Identity>, RegistryError> {
        let bytes = std::fs::read(&item.path)?;
        let image = self.pipeline.prepare(&bytes)?;
        let located = self.pipeline.locate(&image, self.strategy)?;
        let bbox = located.boxes.first().ok_or(RegistryError::NoFaceDetected)?;
        self.pipeline
            .encoders
            .iter()
            .map(|encoder| {
                Ok(Identity {
                    label: item.label.clone(),
                    descriptor: encoder.encode_one(&image, bbox)?,
                })
            })
            .collect()
    }
}
