use crate::engine::{EngineError, EngineHandle};
use chrono::{DateTime, Utc};
use faceprint_core::{DescriptorKind, DetectionStrategy, RecognizeOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use zbus::interface;

/// D-Bus interface for the faceprint daemon.
///
/// Bus name: org.faceprint.Faceprint1
/// Object path: /org/faceprint/Faceprint1
pub struct FaceprintService {
    engine: EngineHandle,
    output_dir: PathBuf,
    results: AtomicU64,
}

impl FaceprintService {
    pub fn new(engine: EngineHandle, output_dir: PathBuf) -> Self {
        Self {
            engine,
            output_dir,
            results: AtomicU64::new(0),
        }
    }
}

#[interface(name = "org.faceprint.Faceprint1")]
impl FaceprintService {
    /// Enroll `label` from an encoded PNG/JPEG image.
    async fn enroll(&self, label: &str, image: Vec<u8>) -> zbus::fdo::Result<()> {
        tracing::info!(label, bytes = image.len(), "enroll requested");
        self.engine.enroll(label.to_string(), image).await.map_err(to_fdo)
    }

    /// Recognize every face in the image. Empty `strategy`/`encoder` select
    /// the configured defaults. Returns the result as JSON.
    async fn recognize(
        &self,
        image: Vec<u8>,
        strategy: &str,
        encoder: &str,
        use_classifier: bool,
        annotate: bool,
    ) -> zbus::fdo::Result<String> {
        let options = RecognizeOptions {
            strategy: parse_optional::<DetectionStrategy>(strategy)?,
            encoder: parse_optional::<DescriptorKind>(encoder)?,
            use_classifier,
            annotate,
        };
        tracing::info!(?options, bytes = image.len(), "recognize requested");
        let mut recognition = self.engine.recognize(image, options).await.map_err(to_fdo)?;

        let annotated_path = match recognition.annotated_png.take() {
            Some(png) => {
                let n = self.results.fetch_add(1, Ordering::Relaxed);
                let path = self.output_dir.join(result_file_name(Utc::now(), n));
                let written = async {
                    tokio::fs::create_dir_all(&self.output_dir).await?;
                    tokio::fs::write(&path, png).await
                };
                written
                    .await
                    .map_err(|e| zbus::fdo::Error::Failed(format!("storage: {e}")))?;
                tracing::debug!(path = %path.display(), "annotated result written");
                Some(path.to_string_lossy().into_owned())
            }
            None => None,
        };

        let mut body = serde_json::to_value(&recognition).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        body["annotated_path"] = serde_json::json!(annotated_path);
        Ok(body.to_string())
    }

    /// Enrolled labels in enrollment order.
    async fn list_identities(&self) -> zbus::fdo::Result<Vec<String>> {
        self.engine.list_identities().await.map_err(to_fdo)
    }

    async fn delete_identity(&self, label: &str) -> zbus::fdo::Result<()> {
        tracing::info!(label, "delete requested");
        self.engine.delete_identity(label.to_string()).await.map_err(to_fdo)
    }

    /// Train the classifier. Zero selects the configured epochs/batch size.
    /// Returns the training report as JSON.
    async fn train_classifier(&self, epochs: u32, batch_size: u32) -> zbus::fdo::Result<String> {
        tracing::info!(epochs, batch_size, "training requested");
        let nonzero = |v: u32| (v > 0).then_some(v as usize);
        let report = self
            .engine
            .train_classifier(nonzero(epochs), nonzero(batch_size))
            .await
            .map_err(to_fdo)?;
        serde_json::to_string(&report).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await;
        serde_json::to_string(&status).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }
}

/// Annotated result names carry the write time so a restarted daemon does
/// not overwrite earlier results.
fn result_file_name(now: DateTime<Utc>, n: u64) -> String {
    format!("result_{}_{n}.png", now.format("%Y%m%dT%H%M%S%3f"))
}

fn parse_optional<T: std::str::FromStr>(value: &str) -> zbus::fdo::Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|e: T::Err| zbus::fdo::Error::InvalidArgs(e.to_string()))
}

/// `"<kind>: <message>"` so clients can branch on the kind.
fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match err {
        EngineError::Service(e) => zbus::fdo::Error::Failed(format!("{}: {e}", e.kind())),
        EngineError::TaskFailed(e) => zbus::fdo::Error::Failed(format!("internal: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_result_file_name_is_unique_across_restarts() {
        let first_run = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        let second_run = first_run + chrono::Duration::milliseconds(1500);
        assert_eq!(result_file_name(first_run, 0), "result_20260301T093000000_0.png");
        assert_ne!(result_file_name(first_run, 0), result_file_name(second_run, 0));
        assert_ne!(result_file_name(first_run, 0), result_file_name(first_run, 1));
    }

    #[test]
    fn test_parse_optional() {
        assert_eq!(parse_optional::<DetectionStrategy>("").unwrap(), None);
        assert!(matches!(
            parse_optional::<DetectionStrategy>("nope"),
            Err(zbus::fdo::Error::InvalidArgs(_))
        ));
    }
}
