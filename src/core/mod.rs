//! Core types shared across the pipeline

pub mod event;

pub use event::{EventType, NormalizedEvent, RiskTier};
