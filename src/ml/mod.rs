//! Anomaly scoring engine
//!
//! Feature vectors are z-normalized with statistics persisted at training
//! time, scored by an injected model, and mapped to a bounded score with a
//! discrete risk tier and per-feature attribution. The model is held behind
//! a hot-swappable handle so retraining never interrupts scoring.

pub mod model;
pub mod scorer;

pub use model::{
    train_baseline, FeatureScaling, ModelArtifacts, ModelHandle, SavedModel, ScoringModel,
    StatisticalModel,
};
pub use scorer::{AnomalyScore, AnomalyScorer, ScorerConfig};
