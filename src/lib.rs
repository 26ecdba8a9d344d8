pub mod alerts;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod features;
pub mod ml;
pub mod resilience;
pub mod response;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::alerts::{AlertChannel, AlertEvent};
use crate::engine::{Pipeline, PipelineStats};

pub use crate::config::Config;
pub use crate::core::{EventType, NormalizedEvent, RiskTier};
pub use crate::engine::{EventSource, ExecutionReceipt, Reporter, ResponseExecutor};
pub use crate::error::PipelineError;
pub use crate::ml::{AnomalyScore, AnomalyScorer};
pub use crate::response::{ActionType, ResponseAction};

/// Handle for signaling daemon shutdown from another task
#[derive(Clone)]
pub struct DaemonHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl DaemonHandle {
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Daemon runner: drives inference cycles on a poll interval and drains the
/// alert channel on an independent consumer task.
///
/// Shutdown is cooperative: intake stops, the in-flight cycle finishes, and
/// the alert channel is drained once before exit.
pub struct Daemon {
    pipeline: Pipeline,
    poll_interval: Duration,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Option<mpsc::Receiver<()>>,
}

impl Daemon {
    pub fn new(pipeline: Pipeline, poll_interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        Self {
            pipeline,
            poll_interval,
            shutdown_tx,
            shutdown_rx: Some(shutdown_rx),
        }
    }

    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    /// Run until a shutdown signal arrives
    pub async fn run(&mut self) -> Result<()> {
        let mut shutdown_rx = self
            .shutdown_rx
            .take()
            .ok_or_else(|| anyhow!("daemon can only run once"))?;

        let alerts = self.pipeline.alerts();
        let consumer = tokio::spawn(drain_loop(alerts.clone()));

        let mut interval = tokio::time::interval(self.poll_interval);
        info!("daemon started, inference cycle every {:?}", self.poll_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let anomalies = self.pipeline.run_cycle();
                    if !anomalies.is_empty() {
                        info!("cycle completed with {} anomalies", anomalies.len());
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        consumer.abort();
        // Final drain so nothing queued is lost on exit
        for alert in alerts.drain() {
            log_alert(&alert);
        }
        info!(
            "daemon stopped ({} cycles completed)",
            self.pipeline.stats().cycles_completed
        );
        Ok(())
    }
}

/// Consumer path: periodically drain the alert channel
async fn drain_loop(alerts: Arc<AlertChannel>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        for alert in alerts.drain() {
            log_alert(&alert);
        }
    }
}

fn log_alert(alert: &AlertEvent) {
    match alert {
        AlertEvent::Anomaly(score) => {
            let origin = score
                .source_ip
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            warn!(
                "[alert] {} anomaly from {} (score {:.3}): {}",
                score.risk_tier, origin, score.score, score.explanation
            );
        }
        AlertEvent::Response(action) => {
            let prefix = if action.dry_run { "dry-run " } else { "" };
            info!(
                "[alert] {}{} on {}: {}",
                prefix, action.action_type, action.target, action.reason
            );
        }
        AlertEvent::ComponentDegraded { component, state } => {
            warn!("[alert] component {} degraded (circuit {})", component, state);
        }
    }
}
