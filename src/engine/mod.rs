//! Inference pipeline
//!
//! Drives one inference cycle: pull normalized events from the ingestion
//! seam, aggregate features, score, alert, report, decide and execute
//! responses. Every external call goes through the fault guard and the cycle
//! itself never raises: errors are logged and swallowed at this single outer
//! seam, returning an empty or partial result set instead.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alerts::{AlertChannel, AlertEvent};
use crate::config::Config;
use crate::core::{NormalizedEvent, RiskTier};
use crate::features::FeatureAggregator;
use crate::ml::{AnomalyScore, AnomalyScorer};
use crate::resilience::{CallError, Component, FaultGuard};
use crate::response::{ResponseAction, ResponseDecider};

/// Supplies batches of normalized events (log tailer, journal reader, ...)
pub trait EventSource: Send {
    fn poll(&mut self, max_events: usize) -> anyhow::Result<Vec<NormalizedEvent>>;
}

/// Executes decided response actions; owns all privileged execution
pub trait ResponseExecutor: Send {
    fn execute(&mut self, action: &ResponseAction) -> anyhow::Result<ExecutionReceipt>;
}

/// Persists anomaly scores (incident reports, SIEM forwarding, ...)
pub trait Reporter: Send {
    fn report(&mut self, score: &AnomalyScore) -> anyhow::Result<()>;
}

/// Result returned by the response executor
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReceipt {
    pub success: bool,
    pub result_message: String,
    pub executed_at: DateTime<Utc>,
}

/// Pipeline counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PipelineStats {
    pub cycles_completed: u64,
    pub events_processed: u64,
    pub events_malformed: u64,
    pub anomalies_detected: u64,
    pub actions_decided: u64,
    pub actions_executed: u64,
}

/// Replay source backed by a pre-built event list
pub struct ReplaySource {
    events: VecDeque<NormalizedEvent>,
}

impl ReplaySource {
    pub fn new(events: Vec<NormalizedEvent>) -> Self {
        Self {
            events: events.into(),
        }
    }
}

impl EventSource for ReplaySource {
    fn poll(&mut self, max_events: usize) -> anyhow::Result<Vec<NormalizedEvent>> {
        let take = max_events.min(self.events.len());
        Ok(self.events.drain(..take).collect())
    }
}

/// The detection-and-response pipeline
pub struct Pipeline {
    batch_size: usize,
    aggregator: FeatureAggregator,
    scorer: AnomalyScorer,
    decider: ResponseDecider,
    guard: FaultGuard,
    alerts: Arc<AlertChannel>,
    source: Box<dyn EventSource>,
    executor: Box<dyn ResponseExecutor>,
    reporter: Box<dyn Reporter>,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        source: Box<dyn EventSource>,
        executor: Box<dyn ResponseExecutor>,
        reporter: Box<dyn Reporter>,
    ) -> Self {
        Self {
            batch_size: config.pipeline.batch_size,
            aggregator: FeatureAggregator::new(config.feature_window()),
            scorer: AnomalyScorer::new(config.alert_levels.clone(), config.thresholds.clone()),
            decider: ResponseDecider::new(config.response.clone()),
            guard: FaultGuard::new(&config.resilience),
            alerts: Arc::new(AlertChannel::new(config.pipeline.alert_capacity)),
            source,
            executor,
            reporter,
            stats: PipelineStats::default(),
        }
    }

    /// Shared handle to the alert channel for the consumer path
    pub fn alerts(&self) -> Arc<AlertChannel> {
        self.alerts.clone()
    }

    /// The scorer (for installing or hot-swapping model artifacts)
    pub fn scorer(&self) -> &AnomalyScorer {
        &self.scorer
    }

    pub fn guard(&self) -> &FaultGuard {
        &self.guard
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Run one inference cycle. Never panics and never propagates component
    /// errors; a failing stage degrades to an empty or partial result.
    pub fn run_cycle(&mut self) -> Vec<AnomalyScore> {
        let batch_size = self.batch_size;
        let source = &mut self.source;
        let events = match self.guard.call(Component::Ingestion, || source.poll(batch_size)) {
            Ok(events) => events,
            Err(CallError::Rejected { .. }) => {
                // The breaker already rate-limits its own warning
                self.stats.cycles_completed += 1;
                return Vec::new();
            }
            Err(CallError::Failed(err)) => {
                warn!("ingestion failed: {err:#}");
                self.stats.cycles_completed += 1;
                return Vec::new();
            }
        };

        if events.is_empty() {
            self.stats.cycles_completed += 1;
            return Vec::new();
        }
        debug!("ingested {} events", events.len());

        let mut vectors = Vec::with_capacity(events.len());
        for event in &events {
            match self.aggregator.observe(event) {
                Ok(vector) => vectors.push(vector),
                Err(err) => {
                    // Local to the single event; the cycle continues
                    self.stats.events_malformed += 1;
                    debug!("dropping event {}: {}", event.id, err);
                }
            }
        }
        self.stats.events_processed += vectors.len() as u64;

        let mut anomalies = Vec::new();
        for vector in &vectors {
            let scorer = &self.scorer;
            match self
                .guard
                .call(Component::Scoring, || scorer.score(vector).map_err(Into::into))
            {
                Ok(score) => {
                    if score.is_anomaly {
                        anomalies.push(score);
                    }
                }
                Err(CallError::Rejected { .. }) => {
                    // Scoring circuit is open; skip the rest of this batch
                    break;
                }
                Err(CallError::Failed(err)) => {
                    warn!("scoring failed: {err:#}");
                }
            }
        }

        for score in &anomalies {
            self.stats.anomalies_detected += 1;
            warn!(
                "anomaly detected: {} (score {:.3}, tier {}) - {}",
                score.event_type, score.score, score.risk_tier, score.explanation
            );
            self.alerts.push(AlertEvent::Anomaly(score.clone()));
            self.report(score);
            self.respond(score);
        }

        self.stats.cycles_completed += 1;
        anomalies
    }

    fn report(&mut self, score: &AnomalyScore) {
        let reporter = &mut self.reporter;
        match self.guard.call(Component::Reporting, || reporter.report(score)) {
            Ok(()) => {}
            Err(CallError::Rejected { .. }) => {}
            Err(CallError::Failed(err)) => warn!("reporting failed: {err:#}"),
        }
    }

    fn respond(&mut self, score: &AnomalyScore) {
        let actions = self.decider.decide(score);
        for action in actions {
            self.stats.actions_decided += 1;
            self.alerts.push(AlertEvent::Response(action.clone()));

            if action.dry_run {
                info!(
                    "dry-run: {} on {} ({})",
                    action.action_type, action.target, action.reason
                );
                continue;
            }

            let executor = &mut self.executor;
            match self.guard.call(Component::Response, || executor.execute(&action)) {
                Ok(receipt) => {
                    self.stats.actions_executed += 1;
                    info!(
                        "executed {} on {}: {}",
                        action.action_type, action.target, receipt.result_message
                    );
                }
                Err(CallError::Rejected { .. }) => {
                    // Response is degraded; high-risk detections must stay
                    // visible even without an executed action
                    if score.risk_tier >= RiskTier::High {
                        self.alerts.push(AlertEvent::ComponentDegraded {
                            component: Component::Response,
                            state: self.guard.breaker(Component::Response).state(),
                        });
                    }
                }
                Err(CallError::Failed(err)) => {
                    warn!(
                        "response execution failed for {} on {}: {err:#}",
                        action.action_type, action.target
                    );
                }
            }
        }
    }
}
