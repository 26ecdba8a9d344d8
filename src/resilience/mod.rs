//! Per-component fault isolation
//!
//! Every external call the pipeline makes (ingestion pull, scoring, response
//! execution, report persistence) goes through an independent circuit
//! breaker, so a persistently failing stage never takes the others down.

pub mod breaker;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState};

/// Pipeline components wrapped by fault isolation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Ingestion,
    Scoring,
    Response,
    Reporting,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::Ingestion,
        Component::Scoring,
        Component::Response,
        Component::Reporting,
    ];
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Component::Ingestion => write!(f, "ingestion"),
            Component::Scoring => write!(f, "scoring"),
            Component::Response => write!(f, "response"),
            Component::Reporting => write!(f, "reporting"),
        }
    }
}

/// Outcome of a guarded call
#[derive(Debug, Error)]
pub enum CallError {
    /// The breaker rejected the call without invoking the operation
    #[error("circuit open for {component} (retry in {retry_in_secs}s)")]
    Rejected {
        component: Component,
        retry_in_secs: i64,
    },
    /// The wrapped operation ran and failed
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Registry of one circuit breaker per component.
///
/// Breakers are fully independent: a failure in one never affects another's
/// counters or state.
pub struct FaultGuard {
    breakers: HashMap<Component, CircuitBreaker>,
}

impl FaultGuard {
    pub fn new(config: &BreakerConfig) -> Self {
        let breakers = Component::ALL
            .iter()
            .map(|&c| (c, CircuitBreaker::new(c, config.clone())))
            .collect();
        Self { breakers }
    }

    pub fn breaker(&self, component: Component) -> &CircuitBreaker {
        // All components are registered at construction
        &self.breakers[&component]
    }

    /// Run an operation under the component's breaker
    pub fn call<T, F>(&self, component: Component, op: F) -> Result<T, CallError>
    where
        F: FnOnce() -> anyhow::Result<T>,
    {
        self.breaker(component).call(op)
    }

    /// Snapshot every breaker for status reporting
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        Component::ALL
            .iter()
            .map(|&c| self.breaker(c).snapshot())
            .collect()
    }
}

impl Default for FaultGuard {
    fn default() -> Self {
        Self::new(&BreakerConfig::default())
    }
}
