//! Normalized authentication events
//!
//! Unified event format produced by the (external) log parser and consumed
//! by the aggregation pipeline.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;

/// Risk tiers derived from the continuous anomaly score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum RiskTier {
    Normal = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Default for RiskTier {
    fn default() -> Self {
        RiskTier::Normal
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskTier::Normal => write!(f, "NORMAL"),
            RiskTier::Low => write!(f, "LOW"),
            RiskTier::Medium => write!(f, "MEDIUM"),
            RiskTier::High => write!(f, "HIGH"),
            RiskTier::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Authentication event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    LoginSuccess,
    LoginFailed,
    SudoAttempt,
    SudoFailed,
    SessionStart,
    CommandExec,
    AccountChange,
    LogAccess,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::LoginSuccess => write!(f, "login_success"),
            EventType::LoginFailed => write!(f, "login_failed"),
            EventType::SudoAttempt => write!(f, "sudo_attempt"),
            EventType::SudoFailed => write!(f, "sudo_failed"),
            EventType::SessionStart => write!(f, "session_start"),
            EventType::CommandExec => write!(f, "command_exec"),
            EventType::AccountChange => write!(f, "account_change"),
            EventType::LogAccess => write!(f, "log_access"),
        }
    }
}

/// Normalized authentication event
///
/// Immutable once created. The pipeline never parses raw log text; it
/// receives these from the ingestion seam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Unique event ID
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Event timestamp (UTC, monotonic-ordered per source)
    pub timestamp: DateTime<Utc>,
    /// Host that produced the log line
    pub host_origin: String,
    /// Source IP if the event carries one
    pub source_ip: Option<IpAddr>,
    /// Username if the event carries one
    pub username: Option<String>,
    /// Authentication method (password, publickey, sudo, ...)
    pub auth_method: Option<String>,
    /// Event category
    pub event_type: EventType,
    /// Originating service (sshd, sudo, ...)
    pub service_name: String,
    /// Session identifier if the event belongs to a session
    pub session_id: Option<String>,
    /// Executed command line (command_exec events)
    pub command: Option<String>,
    /// Autonomous system number of the source, if the parser resolved one
    pub asn: Option<u32>,
}

impl NormalizedEvent {
    /// Create a new event with the required fields
    pub fn new(
        timestamp: DateTime<Utc>,
        host_origin: &str,
        event_type: EventType,
        service_name: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            host_origin: host_origin.to_string(),
            source_ip: None,
            username: None,
            auth_method: None,
            event_type,
            service_name: service_name.to_string(),
            session_id: None,
            command: None,
            asn: None,
        }
    }

    /// Set source IP
    pub fn with_source_ip(mut self, ip: IpAddr) -> Self {
        self.source_ip = Some(ip);
        self
    }

    /// Set username
    pub fn with_username(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }

    /// Set authentication method
    pub fn with_auth_method(mut self, method: &str) -> Self {
        self.auth_method = Some(method.to_string());
        self
    }

    /// Set session ID
    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    /// Set executed command
    pub fn with_command(mut self, command: &str) -> Self {
        self.command = Some(command.to_string());
        self
    }

    /// Set source ASN
    pub fn with_asn(mut self, asn: u32) -> Self {
        self.asn = Some(asn);
        self
    }

    /// Check the event carries enough context to aggregate on.
    ///
    /// An event with neither a source IP nor a username has no aggregation
    /// key and is rejected rather than producing a partial vector.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.source_ip.is_none() && self.username.is_none() {
            return Err(PipelineError::MalformedEvent {
                field: "source_ip/username",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_risk_tier_ordering() {
        assert!(RiskTier::Critical > RiskTier::High);
        assert!(RiskTier::High > RiskTier::Medium);
        assert!(RiskTier::Medium > RiskTier::Low);
        assert!(RiskTier::Low > RiskTier::Normal);
    }

    #[test]
    fn test_event_builder() {
        let event = NormalizedEvent::new(Utc::now(), "web01", EventType::LoginFailed, "sshd")
            .with_source_ip(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 10)))
            .with_username("root")
            .with_auth_method("password");

        assert_eq!(event.event_type, EventType::LoginFailed);
        assert_eq!(event.username.as_deref(), Some("root"));
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_event_without_keys_is_malformed() {
        let event = NormalizedEvent::new(Utc::now(), "web01", EventType::LogAccess, "syslog");
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_event_type_display() {
        assert_eq!(EventType::LoginFailed.to_string(), "login_failed");
        assert_eq!(EventType::SudoAttempt.to_string(), "sudo_attempt");
        assert_eq!(RiskTier::Critical.to_string(), "CRITICAL");
    }

    #[test]
    fn test_event_json_roundtrip() {
        let event = NormalizedEvent::new(Utc::now(), "web01", EventType::CommandExec, "audit")
            .with_username("alice")
            .with_session("s-1")
            .with_command("/usr/bin/curl http://example.com");

        let json = serde_json::to_string(&event).unwrap();
        let back: NormalizedEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type, EventType::CommandExec);
        assert_eq!(back.session_id.as_deref(), Some("s-1"));
    }
}
