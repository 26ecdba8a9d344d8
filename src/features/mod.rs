//! Sliding-window feature aggregation
//!
//! Maintains per-key (IP, user, session) rolling state over a trailing time
//! window and computes a fixed 14-dimension feature vector per incoming
//! event. Keyed state is sharded so events for different keys aggregate in
//! parallel; events for the same key are serialized by the shard lock.

pub mod vector;

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use chrono::{DateTime, Duration, Timelike, Utc};
use parking_lot::Mutex;

use crate::core::{EventType, NormalizedEvent};
use crate::error::PipelineError;

pub use vector::{FeatureVector, FEATURE_NAMES, NUM_FEATURES};

/// Number of lock shards for keyed state
const SHARD_COUNT: usize = 16;

/// Cap on the per-user login-hour baseline
const MAX_LOGIN_HOURS: usize = 512;

/// Living-off-the-land binaries whose execution is itself a signal
const LOLBINS: &[&str] = &[
    "bash", "sh", "python", "perl", "ruby", "php", "curl", "wget", "nc", "netcat", "telnet",
    "find", "grep", "awk", "sed", "tar", "zip", "gzip", "dd", "cp", "mv", "chmod", "gcc", "make",
    "git", "svn",
];

/// Aggregation key: each owns an independent rolling window
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AggregationKey {
    Ip(IpAddr),
    User(String),
    Session(String),
}

/// One event inside a rolling window
#[derive(Debug, Clone)]
struct WindowEntry {
    timestamp: DateTime<Utc>,
    event_type: EventType,
    username: Option<String>,
    auth_method: Option<String>,
}

impl WindowEntry {
    fn from_event(event: &NormalizedEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            event_type: event.event_type,
            username: event.username.clone(),
            auth_method: event.auth_method.clone(),
        }
    }
}

/// Rolling state for one aggregation key
///
/// `events` is windowed; the baseline structures (known IPs/ASNs, login
/// hours, sudo flag) intentionally outlive the window.
#[derive(Debug, Default)]
struct KeyState {
    events: VecDeque<WindowEntry>,
    known_ips: HashSet<IpAddr>,
    known_asns: HashSet<u32>,
    login_hours: VecDeque<f64>,
    has_used_sudo: bool,
    last_login_at: Option<DateTime<Utc>>,
    session_started_at: Option<DateTime<Utc>>,
}

impl KeyState {
    fn push(&mut self, entry: WindowEntry) {
        self.events.push_back(entry);
    }

    /// Evict entries at or before the cutoff
    fn prune(&mut self, cutoff: DateTime<Utc>) {
        while let Some(front) = self.events.front() {
            if front.timestamp <= cutoff {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    fn count(&self, event_type: EventType) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    /// Mean seconds between consecutive window entries
    fn avg_inter_attempt_seconds(&self) -> f64 {
        if self.events.len() < 2 {
            return 0.0;
        }
        let mut total = 0.0;
        let mut gaps = 0usize;
        let mut prev: Option<DateTime<Utc>> = None;
        for entry in &self.events {
            if let Some(p) = prev {
                total += (entry.timestamp - p).num_milliseconds() as f64 / 1000.0;
                gaps += 1;
            }
            prev = Some(entry.timestamp);
        }
        if gaps == 0 {
            0.0
        } else {
            total / gaps as f64
        }
    }
}

/// Sample standard deviation
fn stddev(values: &VecDeque<f64>) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    var.sqrt()
}

/// Check whether a command line invokes a LOLBin
fn is_lolbin(command: &str) -> bool {
    let program = match command.split_whitespace().next() {
        Some(p) => p,
        None => return false,
    };
    let basename = program.rsplit('/').next().unwrap_or(program).to_lowercase();
    LOLBINS.contains(&basename.as_str())
}

/// Sliding-window feature aggregator
///
/// Safe to call concurrently; events for different keys proceed in parallel
/// across shards.
pub struct FeatureAggregator {
    window: Duration,
    shards: Vec<Mutex<HashMap<AggregationKey, KeyState>>>,
}

impl Default for FeatureAggregator {
    fn default() -> Self {
        Self::new(Duration::minutes(5))
    }
}

impl FeatureAggregator {
    /// Create an aggregator with the given feature window
    pub fn new(window: Duration) -> Self {
        let shards = (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect();
        Self { window, shards }
    }

    fn shard(&self, key: &AggregationKey) -> &Mutex<HashMap<AggregationKey, KeyState>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Number of live keys across all shards
    pub fn tracked_keys(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Ingest one event and compute its feature vector.
    ///
    /// Windows are pruned relative to the event's own timestamp, so replayed
    /// timelines aggregate identically. Malformed events (no IP and no
    /// username) are rejected; no partial vector is produced.
    pub fn observe(&self, event: &NormalizedEvent) -> Result<FeatureVector, PipelineError> {
        event.validate()?;

        let now = event.timestamp;
        let cutoff = now - self.window;
        let mut vector = FeatureVector::zeroed(event);

        if let Some(ip) = event.source_ip {
            let key = AggregationKey::Ip(ip);
            let mut shard = self.shard(&key).lock();
            let state = shard.entry(key).or_default();
            state.push(WindowEntry::from_event(event));
            state.prune(cutoff);
            Self::ip_features(state, &mut vector);
        }

        if let Some(username) = &event.username {
            let key = AggregationKey::User(username.clone());
            let mut shard = self.shard(&key).lock();
            let state = shard.entry(key).or_default();
            state.push(WindowEntry::from_event(event));
            state.prune(cutoff);
            Self::user_features(state, event, &mut vector);
        }

        if let Some(session_id) = &event.session_id {
            let key = AggregationKey::Session(session_id.clone());
            let mut shard = self.shard(&key).lock();
            let state = shard.entry(key).or_default();
            state.push(WindowEntry::from_event(event));
            state.prune(cutoff);
            Self::session_features(state, event, now, &mut vector);
        }

        Ok(vector)
    }

    fn ip_features(state: &KeyState, out: &mut FeatureVector) {
        let mut failed = 0usize;
        let mut success = 0usize;
        let mut users: HashSet<&str> = HashSet::new();
        let mut methods: HashSet<&str> = HashSet::new();
        let mut with_method = 0usize;

        for entry in &state.events {
            match entry.event_type {
                EventType::LoginFailed => failed += 1,
                EventType::LoginSuccess => success += 1,
                _ => {}
            }
            if let Some(user) = &entry.username {
                users.insert(user.as_str());
            }
            if let Some(method) = &entry.auth_method {
                methods.insert(method.as_str());
                with_method += 1;
            }
        }

        out.ip_failed_logins = failed as f64;
        out.ip_unique_users_attempted = users.len() as f64;
        // Sentinel rules: no successes but failures present is maximal
        // suspicion (1.0); no failures at all is 0.0.
        out.ip_failed_to_success_ratio = if failed == 0 {
            0.0
        } else if success == 0 {
            1.0
        } else {
            failed as f64 / (failed + success) as f64
        };
        out.ip_avg_inter_attempt_seconds = state.avg_inter_attempt_seconds();
        out.ip_auth_method_variance = if with_method == 0 {
            0.0
        } else {
            methods.len() as f64 / with_method as f64
        };
    }

    fn user_features(state: &mut KeyState, event: &NormalizedEvent, out: &mut FeatureVector) {
        // Membership is checked by the insert itself: first sight is new by
        // definition, and is known from then on.
        if let Some(ip) = event.source_ip {
            out.user_new_ip_detected = if state.known_ips.insert(ip) { 1.0 } else { 0.0 };
        }
        if let Some(asn) = event.asn {
            out.user_login_from_new_asn = if state.known_asns.insert(asn) { 1.0 } else { 0.0 };
        }

        if event.event_type == EventType::SudoAttempt {
            out.user_first_sudo_usage = if state.has_used_sudo { 0.0 } else { 1.0 };
            state.has_used_sudo = true;
        }

        if event.event_type == EventType::LoginSuccess {
            let hour = event.timestamp.hour() as f64 + event.timestamp.minute() as f64 / 60.0;
            if state.login_hours.len() >= MAX_LOGIN_HOURS {
                state.login_hours.pop_front();
            }
            state.login_hours.push_back(hour);
        }

        out.user_login_time_std_devs = stddev(&state.login_hours);
        out.user_failed_sudo_attempts = state.count(EventType::SudoFailed) as f64;
    }

    fn session_features(
        state: &mut KeyState,
        event: &NormalizedEvent,
        now: DateTime<Utc>,
        out: &mut FeatureVector,
    ) {
        if state.session_started_at.is_none() {
            state.session_started_at = Some(now);
        }

        if event.event_type == EventType::SudoAttempt {
            if let Some(login_at) = state.last_login_at {
                let secs = (now - login_at).num_milliseconds() as f64 / 1000.0;
                out.session_login_to_privesc_seconds = secs.max(0.0);
            }
        }

        if matches!(
            event.event_type,
            EventType::LoginSuccess | EventType::SessionStart
        ) {
            state.last_login_at = Some(now);
        }

        let commands = state.count(EventType::CommandExec) as f64;
        let elapsed_secs = state
            .session_started_at
            .map(|start| (now - start).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0)
            .max(1.0);
        out.session_post_login_command_rate = commands / (elapsed_secs / 60.0);

        if event.event_type == EventType::CommandExec {
            if let Some(command) = &event.command {
                out.session_lolbin_executed = if is_lolbin(command) { 1.0 } else { 0.0 };
            }
        }

        out.session_account_changes = state.count(EventType::AccountChange) as f64;
    }
}
