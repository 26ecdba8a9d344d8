use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use authwarden::config::Config;
use authwarden::core::NormalizedEvent;
use authwarden::engine::{EventSource, ExecutionReceipt, Pipeline, Reporter, ResponseExecutor};
use authwarden::ml::{AnomalyScore, SavedModel};
use authwarden::response::ResponseAction;
use authwarden::Daemon;

/// Ingestion seam for the standalone binary: newline-delimited JSON events
/// on stdin, already normalized by the external parser. A reader thread
/// feeds a channel so `poll` never blocks the cycle loop.
struct StdinJsonSource {
    rx: Receiver<NormalizedEvent>,
}

impl StdinJsonSource {
    fn spawn() -> Self {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) if line.trim().is_empty() => continue,
                    Ok(line) => match serde_json::from_str::<NormalizedEvent>(&line) {
                        Ok(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!("skipping undecodable event line: {}", err),
                    },
                    Err(err) => {
                        warn!("stdin read error: {}", err);
                        break;
                    }
                }
            }
        });
        Self { rx }
    }
}

impl EventSource for StdinJsonSource {
    fn poll(&mut self, max_events: usize) -> Result<Vec<NormalizedEvent>> {
        let mut events = Vec::new();
        while events.len() < max_events {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(events)
    }
}

/// Response seam for the standalone binary: logs the hand-off. Privileged
/// execution belongs to the host-side executor, not this process.
struct LoggingExecutor;

impl ResponseExecutor for LoggingExecutor {
    fn execute(&mut self, action: &ResponseAction) -> Result<ExecutionReceipt> {
        info!(
            "handing off {} on {} to host executor: {}",
            action.action_type, action.target, action.reason
        );
        Ok(ExecutionReceipt {
            success: true,
            result_message: format!("{} delegated for {}", action.action_type, action.target),
            executed_at: Utc::now(),
        })
    }
}

/// Reporting seam for the standalone binary: append anomalies to a JSONL
/// stream
struct JsonlReporter {
    path: PathBuf,
}

impl JsonlReporter {
    fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self { path })
    }
}

impl Reporter for JsonlReporter {
    fn report(&mut self, score: &AnomalyScore) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(score)?)?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load_or_default()?;

    let source = StdinJsonSource::spawn();
    let reporter = JsonlReporter::new(PathBuf::from("authwarden-anomalies.jsonl"))?;
    let pipeline = Pipeline::new(
        &config,
        Box::new(source),
        Box::new(LoggingExecutor),
        Box::new(reporter),
    );

    match &config.model.model_path {
        Some(path) if path.exists() => {
            let saved = SavedModel::load(path)?;
            pipeline.scorer().model().swap(saved.into_artifacts());
        }
        Some(path) => warn!(
            "model file {:?} not found; scoring disabled until a model is installed",
            path
        ),
        None => warn!("no model_path configured; scoring disabled until a model is installed"),
    }

    let mut daemon = Daemon::new(
        pipeline,
        Duration::from_secs(config.pipeline.poll_interval_secs),
    );
    let handle = daemon.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.shutdown().await;
        }
    });

    daemon.run().await
}
