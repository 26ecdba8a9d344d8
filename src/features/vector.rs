//! Feature vector definition
//!
//! Fixed 14-dimension behavioral feature vector computed per event:
//! 5 per-IP, 5 per-user, 4 per-session features. Every field is always
//! populated; a missing signal is 0.0, never absent.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{EventType, NormalizedEvent};

/// Number of features in a vector
pub const NUM_FEATURES: usize = 14;

/// Feature names in vector order
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    // Per-IP features
    "ip_failed_logins",
    "ip_unique_users_attempted",
    "ip_failed_to_success_ratio",
    "ip_avg_inter_attempt_seconds",
    "ip_auth_method_variance",
    // Per-user features
    "user_login_time_std_devs",
    "user_new_ip_detected",
    "user_first_sudo_usage",
    "user_failed_sudo_attempts",
    "user_login_from_new_asn",
    // Per-session features
    "session_login_to_privesc_seconds",
    "session_post_login_command_rate",
    "session_lolbin_executed",
    "session_account_changes",
];

/// Behavioral feature vector for one event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Event this vector was computed for
    pub event_id: Uuid,
    /// Timestamp of the event
    pub timestamp: DateTime<Utc>,
    /// Source IP of the event
    pub source_ip: Option<IpAddr>,
    /// Username of the event
    pub username: Option<String>,
    /// Event category
    pub event_type: EventType,

    // Per-IP features
    pub ip_failed_logins: f64,
    pub ip_unique_users_attempted: f64,
    pub ip_failed_to_success_ratio: f64,
    pub ip_avg_inter_attempt_seconds: f64,
    pub ip_auth_method_variance: f64,

    // Per-user features
    pub user_login_time_std_devs: f64,
    pub user_new_ip_detected: f64,
    pub user_first_sudo_usage: f64,
    pub user_failed_sudo_attempts: f64,
    pub user_login_from_new_asn: f64,

    // Per-session features
    pub session_login_to_privesc_seconds: f64,
    pub session_post_login_command_rate: f64,
    pub session_lolbin_executed: f64,
    pub session_account_changes: f64,
}

impl FeatureVector {
    /// Create a zeroed vector carrying the event's context
    pub fn zeroed(event: &NormalizedEvent) -> Self {
        Self {
            event_id: event.id,
            timestamp: event.timestamp,
            source_ip: event.source_ip,
            username: event.username.clone(),
            event_type: event.event_type,
            ip_failed_logins: 0.0,
            ip_unique_users_attempted: 0.0,
            ip_failed_to_success_ratio: 0.0,
            ip_avg_inter_attempt_seconds: 0.0,
            ip_auth_method_variance: 0.0,
            user_login_time_std_devs: 0.0,
            user_new_ip_detected: 0.0,
            user_first_sudo_usage: 0.0,
            user_failed_sudo_attempts: 0.0,
            user_login_from_new_asn: 0.0,
            session_login_to_privesc_seconds: 0.0,
            session_post_login_command_rate: 0.0,
            session_lolbin_executed: 0.0,
            session_account_changes: 0.0,
        }
    }

    /// Feature values in `FEATURE_NAMES` order
    pub fn to_vector(&self) -> [f64; NUM_FEATURES] {
        [
            self.ip_failed_logins,
            self.ip_unique_users_attempted,
            self.ip_failed_to_success_ratio,
            self.ip_avg_inter_attempt_seconds,
            self.ip_auth_method_variance,
            self.user_login_time_std_devs,
            self.user_new_ip_detected,
            self.user_first_sudo_usage,
            self.user_failed_sudo_attempts,
            self.user_login_from_new_asn,
            self.session_login_to_privesc_seconds,
            self.session_post_login_command_rate,
            self.session_lolbin_executed,
            self.session_account_changes,
        ]
    }

    /// Get a feature value by name
    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|&n| n == name)
            .map(|idx| self.to_vector()[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_event() -> NormalizedEvent {
        NormalizedEvent::new(Utc::now(), "web01", EventType::LoginFailed, "sshd")
            .with_username("root")
    }

    #[test]
    fn test_vector_dimension() {
        let vector = FeatureVector::zeroed(&make_event());
        assert_eq!(vector.to_vector().len(), NUM_FEATURES);
        assert_eq!(FEATURE_NAMES.len(), NUM_FEATURES);
    }

    #[test]
    fn test_get_by_name() {
        let mut vector = FeatureVector::zeroed(&make_event());
        vector.ip_failed_logins = 7.0;
        vector.session_account_changes = 2.0;

        assert_eq!(vector.get("ip_failed_logins"), Some(7.0));
        assert_eq!(vector.get("session_account_changes"), Some(2.0));
        assert_eq!(vector.get("no_such_feature"), None);
    }

    #[test]
    fn test_vector_order_matches_names() {
        let mut vector = FeatureVector::zeroed(&make_event());
        vector.user_new_ip_detected = 1.0;

        let idx = FEATURE_NAMES
            .iter()
            .position(|&n| n == "user_new_ip_detected")
            .unwrap();
        assert_eq!(vector.to_vector()[idx], 1.0);
    }
}
