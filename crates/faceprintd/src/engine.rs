use faceprint_core::{FaceService, RecognizeOptions, Recognition, ServiceConfig, ServiceStatus, TrainingReport};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Service(#[from] faceprint_core::Error),
    #[error("engine task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

/// Clone-safe handle to the face service.
///
/// Every call runs on the blocking pool, so a long training run never
/// stalls recognition requests.
#[derive(Clone)]
pub struct EngineHandle {
    service: Arc<FaceService>,
}

impl EngineHandle {
    pub async fn enroll(&self, label: String, image: Vec<u8>) -> Result<(), EngineError> {
        self.run(move |svc| svc.enroll(&label, &image)).await
    }

    pub async fn recognize(&self, image: Vec<u8>, options: RecognizeOptions) -> Result<Recognition, EngineError> {
        self.run(move |svc| svc.recognize(&image, &options)).await
    }

    pub async fn list_identities(&self) -> Result<Vec<String>, EngineError> {
        self.run(|svc| Ok(svc.list_identities())).await
    }

    pub async fn delete_identity(&self, label: String) -> Result<(), EngineError> {
        self.run(move |svc| svc.delete_identity(&label)).await
    }

    pub async fn train_classifier(
        &self,
        epochs: Option<usize>,
        batch_size: Option<usize>,
    ) -> Result<TrainingReport, EngineError> {
        self.run(move |svc| svc.train_classifier(epochs, batch_size)).await
    }

    pub async fn status(&self) -> ServiceStatus {
        self.service.status()
    }

    async fn run<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&FaceService) -> faceprint_core::Result<T> + Send + 'static,
    {
        let service = Arc::clone(&self.service);
        Ok(tokio::task::spawn_blocking(move || f(&service)).await??)
    }
}

/// Build the face service. Fails fast if the identity directory cannot be
/// opened; missing models only disable what depends on them.
pub fn spawn_engine(config: ServiceConfig) -> Result<EngineHandle, EngineError> {
    let service = FaceService::from_config(config)?;
    let status = service.status();
    tracing::info!(
        strategies = ?status.strategies,
        encoders = ?status.encoders,
        identities = status.identities,
        classifier = ?status.classifier,
        "engine ready"
    );
    Ok(EngineHandle {
        service: Arc::new(service),
    })
}
