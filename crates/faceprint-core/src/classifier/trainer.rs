use super::augment::augment;
use super::backbone::FeatureBackbone;
use super::head::{Adam, ClassifierHead};
use super::{TrainedClassifier, TrainingError};
use crate::config::TrainerConfig;
use chrono::Utc;
use image::RgbImage;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeSet;

/// One labelled face crop.
#[derive(Debug, Clone)]
pub struct TrainingSample {
    pub label: String,
    pub face: RgbImage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    pub artifact_id: String,
    pub labels: Vec<String>,
    pub train_samples: usize,
    pub validation_samples: usize,
    pub epochs: usize,
    pub final_loss: f32,
    /// `None` when the sample set was too small to hold any out.
    pub validation_accuracy: Option<f32>,
}

/// Trains a fresh [`ClassifierHead`] on backbone features.
#[derive(Debug, Clone)]
pub struct ClassifierTrainer {
    config: TrainerConfig,
}

impl ClassifierTrainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Augment, extract features, fit the head and return the unpersisted artifact.
    pub fn train(
        &self,
        backbone: &dyn FeatureBackbone,
        samples: &[TrainingSample],
        epochs: usize,
        batch_size: usize,
    ) -> Result<(TrainedClassifier, TrainingReport), TrainingError> {
        let labels: Vec<String> = samples
            .iter()
            .map(|s| s.label.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if labels.len() < 2 {
            return Err(TrainingError::TooFewLabels(labels.len()));
        }

        let cfg = &self.config;
        let mut rng = StdRng::seed_from_u64(cfg.seed);

        let mut dataset: Vec<(Array1<f32>, usize)> = Vec::new();
        for sample in samples {
            let class = labels.iter().position(|l| *l == sample.label).unwrap_or_default();
            let mut variants = vec![sample.face.clone()];
            variants.extend(augment(&sample.face, cfg.augmentations, &mut rng));
            for variant in &variants {
                dataset.push((backbone.features(variant)?, class));
            }
        }

        let dim = dataset.first().map(|(f, _)| f.len()).unwrap_or(0);
        if dim == 0 || dataset.iter().any(|(f, _)| f.len() != dim) {
            return Err(TrainingError::Backbone("inconsistent feature lengths".into()));
        }

        dataset.shuffle(&mut rng);
        let n = dataset.len();
        let n_val = ((n as f32 * cfg.validation_split).floor() as usize).min(n - 1);
        let (validation, train) = dataset.split_at(n_val);

        tracing::info!(
            classes = labels.len(),
            sources = samples.len(),
            train = train.len(),
            validation = validation.len(),
            "training classifier"
        );

        let mut head = ClassifierHead::new(dim, cfg.hidden_units, labels.len(), &mut rng);
        let mut adam = Adam::new(&head, cfg.learning_rate);
        let epochs = epochs.max(1);
        let batch_size = batch_size.max(1);
        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut final_loss = 0.0;
        let mut validation_accuracy = None;

        for epoch in 1..=epochs {
            order.shuffle(&mut rng);
            let mut total = 0.0;
            for batch in order.chunks(batch_size) {
                let rows: Vec<&(Array1<f32>, usize)> = batch.iter().map(|&i| &train[i]).collect();
                let (x, y) = to_matrices(&rows, dim, labels.len());
                let (loss, grads) = head.backprop(&x, &y, (cfg.input_dropout, cfg.hidden_dropout), &mut rng);
                adam.step(&mut head, &grads);
                total += loss * rows.len() as f32;
            }
            final_loss = total / train.len() as f32;

            if !validation.is_empty() {
                let rows: Vec<&(Array1<f32>, usize)> = validation.iter().collect();
                let (x, _) = to_matrices(&rows, dim, labels.len());
                let probs = head.forward(&x);
                let correct = probs
                    .rows()
                    .into_iter()
                    .zip(validation)
                    .filter(|(p, (_, class))| argmax(p.iter()) == *class)
                    .count();
                validation_accuracy = Some(correct as f32 / validation.len() as f32);
            }
            tracing::info!(epoch, loss = final_loss, val_accuracy = ?validation_accuracy, "epoch complete");
        }

        let now = Utc::now();
        let artifact_id = format!("{}-{:08x}", now.format("%Y%m%dT%H%M%S%3f"), rng.gen::<u32>());
        let report = TrainingReport {
            artifact_id: artifact_id.clone(),
            labels: labels.clone(),
            train_samples: train.len(),
            validation_samples: validation.len(),
            epochs,
            final_loss,
            validation_accuracy,
        };
        let trained = TrainedClassifier {
            artifact_id,
            labels,
            head,
            trained_at: now,
            epochs,
            samples: n,
        };
        Ok((trained, report))
    }
}

fn to_matrices(rows: &[&(Array1<f32>, usize)], dim: usize, classes: usize) -> (Array2<f32>, Array2<f32>) {
    let x = Array2::from_shape_fn((rows.len(), dim), |(i, j)| rows[i].0[j]);
    let y = Array2::from_shape_fn((rows.len(), classes), |(i, j)| if rows[i].1 == j { 1.0 } else { 0.0 });
    (x, y)
}

fn argmax<'a>(values: impl Iterator<Item = &'a f32>) -> usize {
    values
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Mean of each channel as a 3-d feature vector.
    struct ChannelMeans;

    impl FeatureBackbone for ChannelMeans {
        fn features(&self, face: &RgbImage) -> Result<Array1<f32>, TrainingError> {
            let n = (face.width() * face.height()) as f32;
            let mut sums = [0f32; 3];
            for p in face.pixels() {
                for c in 0..3 {
                    sums[c] += p[c] as f32 / 255.0;
                }
            }
            Ok(Array1::from(sums.iter().map(|s| s / n).collect::<Vec<_>>()))
        }
    }

    fn sample(label: &str, color: [u8; 3]) -> TrainingSample {
        TrainingSample {
            label: label.into(),
            face: RgbImage::from_pixel(24, 24, Rgb(color)),
        }
    }

    fn fast_config() -> TrainerConfig {
        TrainerConfig {
            augmentations: 4,
            hidden_units: 16,
            learning_rate: 0.05,
            input_dropout: 0.0,
            hidden_dropout: 0.0,
            ..TrainerConfig::default()
        }
    }

    #[test]
    fn test_single_label_rejected() {
        let trainer = ClassifierTrainer::new(fast_config());
        let samples = vec![sample("a", [255, 0, 0]), sample("a", [250, 0, 0])];
        assert!(matches!(
            trainer.train(&ChannelMeans, &samples, 1, 4),
            Err(TrainingError::TooFewLabels(1))
        ));
    }

    #[test]
    fn test_trains_separable_classes() {
        let trainer = ClassifierTrainer::new(fast_config());
        let samples = vec![sample("red", [220, 20, 20]), sample("blue", [20, 20, 220])];
        let (trained, report) = trainer.train(&ChannelMeans, &samples, 60, 4).unwrap();

        assert_eq!(trained.labels, vec!["blue", "red"]);
        assert_eq!(report.train_samples + report.validation_samples, 2 * 5);
        assert_eq!(report.validation_samples, 2);
        assert!(trained.validate().is_ok());

        let red = ChannelMeans.features(&RgbImage::from_pixel(8, 8, Rgb([220, 20, 20]))).unwrap();
        let probs = trained.head.predict(&red);
        assert!(probs[1] > probs[0]);
    }

    #[test]
    fn test_same_seed_same_artifact_weights() {
        let trainer = ClassifierTrainer::new(fast_config());
        let samples = vec![sample("x", [200, 100, 0]), sample("y", [0, 100, 200])];
        let (a, _) = trainer.train(&ChannelMeans, &samples, 3, 4).unwrap();
        let (b, _) = trainer.train(&ChannelMeans, &samples, 3, 4).unwrap();
        assert_eq!(a.head, b.head);
    }
}
