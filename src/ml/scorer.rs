//! Anomaly scoring and risk classification
//!
//! Normalizes a feature vector with the persisted training statistics,
//! obtains a raw indicator from the installed model, maps it to a bounded
//! [0,1] score and a discrete risk tier, and attributes the top
//! contributing features.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::FeatureThresholds;
use crate::core::{EventType, RiskTier};
use crate::error::PipelineError;
use crate::features::{FeatureVector, FEATURE_NAMES};
use crate::ml::model::ModelHandle;

/// Scoring and classification thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    /// Lower bound of the LOW tier
    pub low_threshold: f64,
    /// Lower bound of the MEDIUM tier
    pub medium_threshold: f64,
    /// Lower bound of the HIGH tier
    pub high_threshold: f64,
    /// Lower bound of the CRITICAL tier
    pub critical_threshold: f64,
    /// Scores at or above this count as anomalies (separate knob from the
    /// tier cut points)
    pub anomaly_threshold: f64,
    /// How many contributing features to report
    pub top_features: usize,
    /// Flip the raw model output sign before mapping. The default expects
    /// the model convention "more negative = more anomalous"; set this when
    /// substituting a model with the opposite convention, or every
    /// classification silently inverts.
    pub invert_raw_sign: bool,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            low_threshold: 0.4,
            medium_threshold: 0.6,
            high_threshold: 0.8,
            critical_threshold: 0.9,
            anomaly_threshold: 0.4,
            top_features: 5,
            invert_raw_sign: false,
        }
    }
}

/// Anomaly detection result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyScore {
    /// Event this score belongs to
    pub event_id: Uuid,
    /// Timestamp of the scored event
    pub timestamp: DateTime<Utc>,
    /// Bounded anomaly score (0.0 = normal, 1.0 = highly anomalous)
    pub score: f64,
    /// Raw model output before mapping
    pub raw_score: f64,
    /// Discrete risk classification
    pub risk_tier: RiskTier,
    /// Whether the score crosses the anomaly threshold
    pub is_anomaly: bool,
    /// Confidence in the classification (0.0 - 1.0)
    pub confidence: f64,
    /// Features that contributed most, sorted descending by weight
    pub top_features: Vec<(String, f64)>,
    /// Human-readable explanation
    pub explanation: String,

    // Event context for the response decider and reporter
    pub source_ip: Option<IpAddr>,
    pub username: Option<String>,
    pub event_type: EventType,
}

/// Anomaly scorer with a hot-swappable model slot
pub struct AnomalyScorer {
    config: ScorerConfig,
    thresholds: FeatureThresholds,
    model: ModelHandle,
}

impl AnomalyScorer {
    pub fn new(config: ScorerConfig, thresholds: FeatureThresholds) -> Self {
        Self {
            config,
            thresholds,
            model: ModelHandle::new(),
        }
    }

    /// Access the model slot (for installing or hot-swapping artifacts)
    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    /// Score a feature vector.
    ///
    /// Fails with [`PipelineError::ScoringUnavailable`] when no model is
    /// installed.
    pub fn score(&self, vector: &FeatureVector) -> Result<AnomalyScore, PipelineError> {
        let artifacts = self.model.load().ok_or(PipelineError::ScoringUnavailable)?;

        let raw_values = vector.to_vector();
        let normalized = artifacts.scaling.normalize(&raw_values);

        let mut raw = artifacts.model.predict(&normalized);
        if self.config.invert_raw_sign {
            raw = -raw;
        }

        // sigmoid(-raw): more negative raw output maps closer to 1
        let score = 1.0 / (1.0 + raw.exp());
        let risk_tier = self.classify_score(score);
        let is_anomaly = score >= self.config.anomaly_threshold;
        let confidence = ((score - 0.5).abs() * 2.0).clamp(0.0, 1.0);

        let mut contributions: Vec<(String, f64)> = FEATURE_NAMES
            .iter()
            .zip(normalized.iter())
            .filter(|(_, z)| z.abs() > f64::EPSILON)
            .map(|(name, z)| (name.to_string(), z.abs()))
            .collect();
        contributions.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        contributions.truncate(self.config.top_features);

        let explanation = if is_anomaly {
            self.explain(vector)
        } else {
            "event appears normal".to_string()
        };

        Ok(AnomalyScore {
            event_id: vector.event_id,
            timestamp: vector.timestamp,
            score,
            raw_score: raw,
            risk_tier,
            is_anomaly,
            confidence,
            top_features: contributions,
            explanation,
            source_ip: vector.source_ip,
            username: vector.username.clone(),
            event_type: vector.event_type,
        })
    }

    /// Map a bounded score to a risk tier. Cut points are
    /// lower-bound-inclusive at every boundary.
    pub fn classify_score(&self, score: f64) -> RiskTier {
        if score >= self.config.critical_threshold {
            RiskTier::Critical
        } else if score >= self.config.high_threshold {
            RiskTier::High
        } else if score >= self.config.medium_threshold {
            RiskTier::Medium
        } else if score >= self.config.low_threshold {
            RiskTier::Low
        } else {
            RiskTier::Normal
        }
    }

    /// Build a human-readable explanation from the dominant raw signals
    fn explain(&self, vector: &FeatureVector) -> String {
        let t = &self.thresholds;
        let mut factors = Vec::new();

        if vector.ip_failed_logins > t.failed_login_threshold as f64 {
            factors.push(format!(
                "high failed login count ({})",
                vector.ip_failed_logins as u64
            ));
        }
        if vector.ip_unique_users_attempted > t.unique_users_threshold as f64 {
            factors.push(format!(
                "scanning multiple users ({})",
                vector.ip_unique_users_attempted as u64
            ));
        }
        if vector.ip_failed_to_success_ratio > t.failure_ratio_threshold {
            factors.push(format!(
                "high failure rate ({:.0}%)",
                vector.ip_failed_to_success_ratio * 100.0
            ));
        }
        if vector.user_new_ip_detected > 0.0 {
            factors.push("login from new IP address".to_string());
        }
        if vector.user_login_from_new_asn > 0.0 {
            factors.push("login from new network (ASN)".to_string());
        }
        if vector.user_first_sudo_usage > 0.0 {
            factors.push("first sudo usage for user".to_string());
        }
        if vector.user_failed_sudo_attempts > t.failed_sudo_threshold as f64 {
            factors.push(format!(
                "multiple failed sudo attempts ({})",
                vector.user_failed_sudo_attempts as u64
            ));
        }
        if vector.session_login_to_privesc_seconds > 0.0
            && vector.session_login_to_privesc_seconds < t.rapid_privesc_seconds as f64
        {
            factors.push(format!(
                "rapid privilege escalation ({}s after login)",
                vector.session_login_to_privesc_seconds as u64
            ));
        }
        if vector.session_lolbin_executed > 0.0 {
            factors.push("LOLBin execution detected".to_string());
        }

        if factors.is_empty() {
            "anomalous event pattern with no single dominant factor".to_string()
        } else {
            format!("possible attack: {}", factors.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NormalizedEvent;
    use crate::ml::model::{FeatureScaling, ModelArtifacts, ScoringModel};
    use crate::features::NUM_FEATURES;
    use std::sync::Arc;

    /// Model returning a fixed raw score regardless of input
    struct FixedModel(f64);

    impl ScoringModel for FixedModel {
        fn predict(&self, _normalized: &[f64]) -> f64 {
            self.0
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn identity_scaling() -> FeatureScaling {
        FeatureScaling {
            mean: vec![0.0; NUM_FEATURES],
            std: vec![1.0; NUM_FEATURES],
        }
    }

    fn scorer_with_raw(raw: f64) -> AnomalyScorer {
        let scorer = AnomalyScorer::new(ScorerConfig::default(), FeatureThresholds::default());
        scorer.model().swap(ModelArtifacts {
            scaling: identity_scaling(),
            model: Arc::new(FixedModel(raw)),
            trained_at: Utc::now(),
            sample_count: 1,
        });
        scorer
    }

    fn make_vector() -> FeatureVector {
        let event =
            NormalizedEvent::new(Utc::now(), "web01", EventType::LoginFailed, "sshd")
                .with_username("root");
        FeatureVector::zeroed(&event)
    }

    #[test]
    fn test_scoring_unavailable_without_model() {
        let scorer = AnomalyScorer::new(ScorerConfig::default(), FeatureThresholds::default());
        let result = scorer.score(&make_vector());
        assert!(matches!(result, Err(PipelineError::ScoringUnavailable)));
    }

    #[test]
    fn test_tier_boundaries_inclusive_below() {
        let scorer = AnomalyScorer::new(ScorerConfig::default(), FeatureThresholds::default());

        assert_eq!(scorer.classify_score(0.4), RiskTier::Low);
        assert_eq!(scorer.classify_score(0.39999), RiskTier::Normal);
        assert_eq!(scorer.classify_score(0.6), RiskTier::Medium);
        assert_eq!(scorer.classify_score(0.8), RiskTier::High);
        assert_eq!(scorer.classify_score(0.9), RiskTier::Critical);
        assert_eq!(scorer.classify_score(0.89999), RiskTier::High);
    }

    #[test]
    fn test_sigmoid_mapping_sign_convention() {
        // Strongly negative raw output (model convention: anomalous) must
        // map close to 1.0
        let anomalous = scorer_with_raw(-6.0).score(&make_vector()).unwrap();
        assert!(anomalous.score > 0.99);
        assert_eq!(anomalous.risk_tier, RiskTier::Critical);
        assert!(anomalous.is_anomaly);

        let normal = scorer_with_raw(6.0).score(&make_vector()).unwrap();
        assert!(normal.score < 0.01);
        assert_eq!(normal.risk_tier, RiskTier::Normal);
        assert!(!normal.is_anomaly);
    }

    #[test]
    fn test_inverted_sign_convention() {
        let config = ScorerConfig {
            invert_raw_sign: true,
            ..ScorerConfig::default()
        };
        let scorer = AnomalyScorer::new(config, FeatureThresholds::default());
        scorer.model().swap(ModelArtifacts {
            scaling: identity_scaling(),
            model: Arc::new(FixedModel(6.0)),
            trained_at: Utc::now(),
            sample_count: 1,
        });

        // With the flag set, a high positive raw output means anomalous
        let score = scorer.score(&make_vector()).unwrap();
        assert!(score.score > 0.99);
    }

    #[test]
    fn test_confidence_bounds() {
        let mid = scorer_with_raw(0.0).score(&make_vector()).unwrap();
        assert!(mid.confidence < 1e-9);

        let extreme = scorer_with_raw(-20.0).score(&make_vector()).unwrap();
        assert!(extreme.confidence > 0.99);
        assert!(extreme.confidence <= 1.0);
    }

    #[test]
    fn test_top_features_ranked_by_deviation() {
        let scorer = scorer_with_raw(-3.0);

        let mut vector = make_vector();
        vector.ip_failed_logins = 50.0;
        vector.ip_unique_users_attempted = 8.0;
        vector.user_new_ip_detected = 1.0;

        let score = scorer.score(&vector).unwrap();
        assert_eq!(score.top_features[0].0, "ip_failed_logins");
        assert_eq!(score.top_features[1].0, "ip_unique_users_attempted");
        assert!(score.top_features.len() <= 5);
        // Weights descending
        for pair in score.top_features.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn test_explanation_names_dominant_factors() {
        let scorer = scorer_with_raw(-3.0);

        let mut vector = make_vector();
        vector.ip_failed_logins = 50.0;
        vector.ip_failed_to_success_ratio = 1.0;
        vector.user_new_ip_detected = 1.0;

        let score = scorer.score(&vector).unwrap();
        assert!(score.explanation.contains("failed login"));
        assert!(score.explanation.contains("new IP"));
    }
}
