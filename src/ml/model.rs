//! Scoring models and hot-swappable model artifacts
//!
//! The pipeline treats the anomaly model as an injected black box: anything
//! implementing [`ScoringModel`] can be installed. Artifacts bundle the model
//! with the per-feature scaling statistics captured at training time and are
//! swapped atomically, so a retrained model can be hot-loaded while scoring
//! continues.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::features::NUM_FEATURES;

/// Margin keeping baseline-identical traffic under the decision boundary
const MIN_MARGIN: f64 = 0.5;

/// An injected anomaly model.
///
/// `predict` receives the z-normalized feature vector and returns a raw
/// anomaly indicator. Convention: lower (more negative) output means more
/// anomalous, matching decision-function style scores; the scorer maps raw
/// to a bounded score via sigmoid(-raw).
pub trait ScoringModel: Send + Sync {
    fn predict(&self, normalized: &[f64]) -> f64;

    fn name(&self) -> &str;
}

/// Per-feature scaling statistics persisted at training time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureScaling {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl FeatureScaling {
    /// z-score normalize a raw vector. Features with zero variance are left
    /// as-is rather than divided by zero.
    pub fn normalize(&self, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let std = self.std.get(i).copied().unwrap_or(0.0);
                if std > f64::EPSILON {
                    (v - self.mean[i]) / std
                } else {
                    v
                }
            })
            .collect()
    }
}

/// Statistical baseline model.
///
/// Scores by RMS distance of the normalized vector from the origin, offset
/// by the distance distribution observed on baseline data: samples within
/// the baseline envelope produce positive raw output, outliers strongly
/// negative output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticalModel {
    /// Mean normalized distance over the training set
    pub distance_mean: f64,
    /// Standard deviation of training distances
    pub distance_std: f64,
    /// Decision offset: raw = offset - distance
    pub offset: f64,
}

impl StatisticalModel {
    fn distance(normalized: &[f64]) -> f64 {
        if normalized.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = normalized.iter().map(|v| v * v).sum();
        (sum_sq / normalized.len() as f64).sqrt()
    }
}

impl ScoringModel for StatisticalModel {
    fn predict(&self, normalized: &[f64]) -> f64 {
        self.offset - Self::distance(normalized)
    }

    fn name(&self) -> &str {
        "statistical-baseline"
    }
}

/// Model plus the scaling statistics it was trained with
pub struct ModelArtifacts {
    pub scaling: FeatureScaling,
    pub model: Arc<dyn ScoringModel>,
    pub trained_at: DateTime<Utc>,
    pub sample_count: u64,
}

/// Hot-swappable model slot.
///
/// Readers clone the inner `Arc` under a read lock, so a concurrent `swap`
/// can never expose a torn artifact set.
#[derive(Default)]
pub struct ModelHandle {
    current: RwLock<Option<Arc<ModelArtifacts>>>,
}

impl ModelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current artifacts, if loaded
    pub fn load(&self) -> Option<Arc<ModelArtifacts>> {
        self.current.read().clone()
    }

    /// Install new artifacts, replacing any previous model
    pub fn swap(&self, artifacts: ModelArtifacts) {
        let name = artifacts.model.name().to_string();
        let samples = artifacts.sample_count;
        *self.current.write() = Some(Arc::new(artifacts));
        info!("installed scoring model `{}` ({} training samples)", name, samples);
    }

    /// Drop the current model; scoring fails until a new one is installed
    pub fn clear(&self) {
        *self.current.write() = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.current.read().is_some()
    }
}

/// Serializable trained model for on-disk persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedModel {
    pub scaling: FeatureScaling,
    pub model: StatisticalModel,
    pub trained_at: DateTime<Utc>,
    pub sample_count: u64,
}

impl SavedModel {
    /// Persist to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(&path)
            .with_context(|| format!("failed to create model file {:?}", path.as_ref()))?;
        serde_json::to_writer_pretty(file, self)?;
        info!("saved scoring model to {:?}", path.as_ref());
        Ok(())
    }

    /// Load from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)
            .with_context(|| format!("failed to open model file {:?}", path.as_ref()))?;
        let saved: SavedModel = serde_json::from_reader(BufReader::new(file))?;
        info!(
            "loaded scoring model from {:?} ({} samples)",
            path.as_ref(),
            saved.sample_count
        );
        Ok(saved)
    }

    /// Convert into installable artifacts
    pub fn into_artifacts(self) -> ModelArtifacts {
        ModelArtifacts {
            scaling: self.scaling,
            model: Arc::new(self.model),
            trained_at: self.trained_at,
            sample_count: self.sample_count,
        }
    }
}

/// Train the statistical baseline model on raw (unnormalized) feature
/// vectors of calm traffic.
pub fn train_baseline(samples: &[[f64; NUM_FEATURES]]) -> Result<SavedModel> {
    if samples.is_empty() {
        bail!("no training samples");
    }
    if samples.len() < 100 {
        warn!(
            "small training set ({} samples), model may not generalize",
            samples.len()
        );
    }

    let n = samples.len() as f64;
    let mut mean = vec![0.0f64; NUM_FEATURES];
    for sample in samples {
        for (i, &v) in sample.iter().enumerate() {
            mean[i] += v;
        }
    }
    for m in &mut mean {
        *m /= n;
    }

    let mut std = vec![0.0f64; NUM_FEATURES];
    for sample in samples {
        for (i, &v) in sample.iter().enumerate() {
            std[i] += (v - mean[i]).powi(2);
        }
    }
    for s in &mut std {
        *s = (*s / n).sqrt();
    }

    let scaling = FeatureScaling { mean, std };

    let distances: Vec<f64> = samples
        .iter()
        .map(|s| StatisticalModel::distance(&scaling.normalize(s)))
        .collect();
    let distance_mean = distances.iter().sum::<f64>() / n;
    let distance_std =
        (distances.iter().map(|d| (d - distance_mean).powi(2)).sum::<f64>() / n).sqrt();

    let offset = (distance_mean + 2.0 * distance_std).max(distance_mean + MIN_MARGIN);

    Ok(SavedModel {
        scaling,
        model: StatisticalModel {
            distance_mean,
            distance_std,
            offset,
        },
        trained_at: Utc::now(),
        sample_count: samples.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline_samples() -> Vec<[f64; NUM_FEATURES]> {
        // Mild variation around a calm profile
        (0..200)
            .map(|i| {
                let mut sample = [0.0; NUM_FEATURES];
                sample[0] = (i % 3) as f64; // occasional failed login
                sample[2] = if i % 3 == 0 { 0.0 } else { 0.2 };
                sample[6] = (i % 7 == 0) as u8 as f64; // rare new IP
                sample
            })
            .collect()
    }

    #[test]
    fn test_train_baseline_separates_outliers() {
        let saved = train_baseline(&baseline_samples()).unwrap();
        let artifacts = saved.into_artifacts();

        let calm = [0.0; NUM_FEATURES];
        let calm_raw = artifacts.model.predict(&artifacts.scaling.normalize(&calm));

        let mut attack = [0.0; NUM_FEATURES];
        attack[0] = 50.0;
        attack[1] = 8.0;
        attack[2] = 1.0;
        let attack_raw = artifacts.model.predict(&artifacts.scaling.normalize(&attack));

        assert!(calm_raw > 0.0, "calm raw {} should be positive", calm_raw);
        assert!(attack_raw < 0.0, "attack raw {} should be negative", attack_raw);
        assert!(attack_raw < calm_raw);
    }

    #[test]
    fn test_zero_variance_features_left_as_is() {
        let scaling = FeatureScaling {
            mean: vec![5.0, 0.0],
            std: vec![2.0, 0.0],
        };

        let normalized = scaling.normalize(&[9.0, 3.0]);
        assert!((normalized[0] - 2.0).abs() < 1e-9);
        assert_eq!(normalized[1], 3.0);
    }

    #[test]
    fn test_empty_training_set_fails() {
        assert!(train_baseline(&[]).is_err());
    }

    #[test]
    fn test_model_handle_swap() {
        let handle = ModelHandle::new();
        assert!(!handle.is_loaded());
        assert!(handle.load().is_none());

        let saved = train_baseline(&baseline_samples()).unwrap();
        handle.swap(saved.into_artifacts());
        assert!(handle.is_loaded());

        let snapshot = handle.load().unwrap();
        assert_eq!(snapshot.sample_count, 200);

        handle.clear();
        assert!(!handle.is_loaded());
    }

    #[test]
    fn test_saved_model_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let saved = train_baseline(&baseline_samples()).unwrap();
        let offset = saved.model.offset;
        saved.save(&path).unwrap();

        let loaded = SavedModel::load(&path).unwrap();
        assert_eq!(loaded.sample_count, 200);
        assert!((loaded.model.offset - offset).abs() < 1e-12);
    }
}
