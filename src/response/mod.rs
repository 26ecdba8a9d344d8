//! Incident response decision engine
//!
//! Maps risk-scored anomalies to response actions under a table-driven
//! policy, enforcing per-(action, target) cooldowns so the same target is
//! never hit twice within a cooldown window. Actions are decided here and
//! executed by an external executor; with automated actions disabled the
//! decider still returns the candidates tagged as dry-run for audit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::RiskTier;
use crate::ml::AnomalyScore;

/// Automated response actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    LockAccount,
    UnlockAccount,
    BlockIp,
    UnblockIp,
    TerminateSession,
    AlertOnly,
}

impl ActionType {
    const ALL: [ActionType; 6] = [
        ActionType::LockAccount,
        ActionType::UnlockAccount,
        ActionType::BlockIp,
        ActionType::UnblockIp,
        ActionType::TerminateSession,
        ActionType::AlertOnly,
    ];
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::LockAccount => write!(f, "lock_account"),
            ActionType::UnlockAccount => write!(f, "unlock_account"),
            ActionType::BlockIp => write!(f, "block_ip"),
            ActionType::UnblockIp => write!(f, "unblock_ip"),
            ActionType::TerminateSession => write!(f, "terminate_session"),
            ActionType::AlertOnly => write!(f, "alert_only"),
        }
    }
}

/// Inverse operation recorded with reversible actions so audit logging can
/// capture how to roll back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReversalDescriptor {
    pub action_type: ActionType,
    pub target: String,
}

/// A decided response action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseAction {
    pub id: Uuid,
    pub action_type: ActionType,
    /// Username or IP the action targets
    pub target: String,
    /// Human-readable justification
    pub reason: String,
    pub risk_tier: RiskTier,
    pub created_at: DateTime<Utc>,
    /// Ledger key: `<action_type>:<target>`
    pub cooldown_key: String,
    /// Decided but must not be executed (automated actions disabled)
    pub dry_run: bool,
    pub reversal: Option<ReversalDescriptor>,
}

/// Response policy: tier thresholds, cooldowns, and the global action gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePolicy {
    pub lock_account_at: RiskTier,
    pub block_ip_at: RiskTier,
    pub terminate_session_at: RiskTier,
    pub lock_account_cooldown_secs: u64,
    pub block_ip_cooldown_secs: u64,
    pub terminate_session_cooldown_secs: u64,
    pub enable_automated_actions: bool,
}

impl Default for ResponsePolicy {
    fn default() -> Self {
        Self {
            lock_account_at: RiskTier::High,
            block_ip_at: RiskTier::High,
            terminate_session_at: RiskTier::Critical,
            lock_account_cooldown_secs: 300,
            block_ip_cooldown_secs: 600,
            terminate_session_cooldown_secs: 180,
            enable_automated_actions: false,
        }
    }
}

impl ResponsePolicy {
    /// Cooldown for an action type; alert-only and reversal actions are
    /// never cooldown-gated
    fn cooldown_secs(&self, action_type: ActionType) -> u64 {
        match action_type {
            ActionType::LockAccount => self.lock_account_cooldown_secs,
            ActionType::BlockIp => self.block_ip_cooldown_secs,
            ActionType::TerminateSession => self.terminate_session_cooldown_secs,
            ActionType::UnlockAccount | ActionType::UnblockIp | ActionType::AlertOnly => 0,
        }
    }
}

/// Cooldown ledger: earliest-next-allowed time per (action, target), with
/// one lock per action-type namespace
struct CooldownLedger {
    namespaces: HashMap<ActionType, Mutex<HashMap<String, DateTime<Utc>>>>,
}

impl CooldownLedger {
    fn new() -> Self {
        let namespaces = ActionType::ALL
            .iter()
            .map(|&a| (a, Mutex::new(HashMap::new())))
            .collect();
        Self { namespaces }
    }

    /// Allow the action if the target is out of cooldown; on allow, record
    /// the next-allowed time. Suppression mutates nothing.
    fn try_acquire(
        &self,
        action_type: ActionType,
        target: &str,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> bool {
        if cooldown.is_zero() {
            return true;
        }
        let mut namespace = self.namespaces[&action_type].lock();
        if let Some(next_allowed) = namespace.get(target) {
            if now < *next_allowed {
                return false;
            }
        }
        namespace.insert(target.to_string(), now + cooldown);
        true
    }
}

/// Cooldown-aware response decision engine
pub struct ResponseDecider {
    policy: ResponsePolicy,
    ledger: CooldownLedger,
    decided: AtomicU64,
    suppressed: AtomicU64,
}

impl ResponseDecider {
    pub fn new(policy: ResponsePolicy) -> Self {
        Self {
            policy,
            ledger: CooldownLedger::new(),
            decided: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Decide the response actions for an anomaly
    pub fn decide(&self, score: &AnomalyScore) -> Vec<ResponseAction> {
        self.decide_at(Utc::now(), score)
    }

    pub(crate) fn decide_at(&self, now: DateTime<Utc>, score: &AnomalyScore) -> Vec<ResponseAction> {
        let dry_run = !self.policy.enable_automated_actions;
        let mut actions = Vec::new();

        let subject = score
            .username
            .clone()
            .or_else(|| score.source_ip.map(|ip| ip.to_string()))
            .unwrap_or_else(|| "unknown".to_string());

        // An anomaly always produces an alert action; alerts are exempt from
        // cooldown so visibility is never lost.
        actions.push(self.build_action(
            ActionType::AlertOnly,
            &subject,
            format!(
                "anomaly detected: {} (score {:.2})",
                score.event_type, score.score
            ),
            score.risk_tier,
            now,
            false,
        ));

        if let Some(ip) = score.source_ip {
            if score.risk_tier >= self.policy.block_ip_at {
                let target = ip.to_string();
                self.emit_gated(
                    &mut actions,
                    ActionType::BlockIp,
                    &target,
                    format!("blocking {} after {} ({} risk)", target, score.event_type, score.risk_tier),
                    score.risk_tier,
                    now,
                    dry_run,
                    Some(ReversalDescriptor {
                        action_type: ActionType::UnblockIp,
                        target: target.clone(),
                    }),
                );
            }
        }

        if let Some(username) = &score.username {
            if score.risk_tier >= self.policy.lock_account_at {
                self.emit_gated(
                    &mut actions,
                    ActionType::LockAccount,
                    username,
                    format!(
                        "locking account {} after {} ({} risk)",
                        username, score.event_type, score.risk_tier
                    ),
                    score.risk_tier,
                    now,
                    dry_run,
                    Some(ReversalDescriptor {
                        action_type: ActionType::UnlockAccount,
                        target: username.clone(),
                    }),
                );
            }

            if score.risk_tier >= self.policy.terminate_session_at {
                self.emit_gated(
                    &mut actions,
                    ActionType::TerminateSession,
                    username,
                    format!("terminating sessions for {} ({} risk)", username, score.risk_tier),
                    score.risk_tier,
                    now,
                    dry_run,
                    None,
                );
            }
        }

        self.decided.fetch_add(actions.len() as u64, Ordering::Relaxed);
        actions
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_gated(
        &self,
        actions: &mut Vec<ResponseAction>,
        action_type: ActionType,
        target: &str,
        reason: String,
        risk_tier: RiskTier,
        now: DateTime<Utc>,
        dry_run: bool,
        reversal: Option<ReversalDescriptor>,
    ) {
        let cooldown = Duration::seconds(self.policy.cooldown_secs(action_type) as i64);
        if !self.ledger.try_acquire(action_type, target, now, cooldown) {
            // Not an error: a normal decision-engine outcome
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            info!(
                "suppressing {} on {} (within {}s cooldown)",
                action_type,
                target,
                cooldown.num_seconds()
            );
            return;
        }

        debug!("decided {} on {} ({})", action_type, target, reason);
        let mut action = self.build_action(action_type, target, reason, risk_tier, now, dry_run);
        action.reversal = reversal;
        actions.push(action);
    }

    fn build_action(
        &self,
        action_type: ActionType,
        target: &str,
        reason: String,
        risk_tier: RiskTier,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> ResponseAction {
        ResponseAction {
            id: Uuid::new_v4(),
            action_type,
            target: target.to_string(),
            reason,
            risk_tier,
            created_at: now,
            cooldown_key: format!("{}:{}", action_type, target),
            dry_run,
            reversal: None,
        }
    }

    pub fn suppressed_count(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    pub fn policy(&self) -> &ResponsePolicy {
        &self.policy
    }
}
