//! Online anomaly detection over the operations and audit streams.
//!
//! The detector keeps a per-actor sliding cache of recent successful
//! operations and reads the audit log for failures. `analyze` evaluates the
//! detectors in a fixed order and returns the first hit; hits are recorded
//! back into the audit log as `ANOMALY_DETECTED / WARNING` records.
//!
//! The detector filters its own `ANOMALY_DETECTED` emissions out of every
//! count it takes, so writing an alert can never feed the next analysis.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditEntry, AuditFilter, AuditLog};
use crate::error::CoreError;
use crate::types::{ActorId, AuditAction, AuditRecord, AuditStatus, OperationRecord};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Detector thresholds. The defaults are the documented operating point;
/// override through [`crate::config::CoreConfig`].
#[derive(Clone, Debug)]
pub struct AnomalyConfig {
    /// Operations per window before high_volume fires.
    pub max_ops_per_window: usize,
    /// Sliding window length.
    pub window: Duration,
    /// failed / total ratio at which high_failure_rate fires.
    pub failure_ratio_threshold: f64,
    /// Failed not-active attempts at which revoked_key_usage fires.
    pub revoked_key_attempts_threshold: usize,
    /// Local working hours `[start, end)`. Operations outside them are
    /// unusual_time hits. `start == end` means no working window.
    pub working_hours: (u32, u32),
    /// Hard cap on cached operations per actor.
    pub max_cached_ops: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            max_ops_per_window: 20,
            window: Duration::from_secs(60),
            failure_ratio_threshold: 0.30,
            revoked_key_attempts_threshold: 2,
            working_hours: (7, 22),
            max_cached_ops: 1_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Anomalies
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
}

impl AnomalySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalySeverity::Low => "low",
            AnomalySeverity::Medium => "medium",
            AnomalySeverity::High => "high",
        }
    }
}

/// Detector identity, in evaluation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    HighVolume,
    HighFailureRate,
    RevokedKeyUsage,
    UnusualTime,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::HighVolume => "high_volume",
            AnomalyKind::HighFailureRate => "high_failure_rate",
            AnomalyKind::RevokedKeyUsage => "revoked_key_usage",
            AnomalyKind::UnusualTime => "unusual_time",
        }
    }

    pub fn severity(&self) -> AnomalySeverity {
        match self {
            AnomalyKind::HighVolume => AnomalySeverity::Medium,
            AnomalyKind::HighFailureRate => AnomalySeverity::High,
            AnomalyKind::RevokedKeyUsage => AnomalySeverity::High,
            AnomalyKind::UnusualTime => AnomalySeverity::Low,
        }
    }
}

/// One detector hit.
#[derive(Clone, Debug)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub severity: AnomalySeverity,
    pub actor: ActorId,
    pub detail: String,
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

type OpCache = Arc<Mutex<VecDeque<OperationRecord>>>;

/// The online detector. Cheap to share behind an `Arc`; the engine calls
/// [`observe`](Self::observe) synchronously and [`analyze_and_record`](Self::analyze_and_record)
/// from a background task.
pub struct AnomalyDetector {
    config: AnomalyConfig,
    audit: Arc<AuditLog>,
    /// Per-actor caches; the outer lock only guards map shape, so an
    /// analysis scan never blocks other actors.
    caches: Mutex<HashMap<ActorId, OpCache>>,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig, audit: Arc<AuditLog>) -> Self {
        Self {
            config,
            audit,
            caches: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    /// Feed one successful operation into the actor's sliding cache.
    pub fn observe(&self, op: &OperationRecord) {
        let cache = self.cache_for(op.actor);
        let Ok(mut ops) = cache.lock() else {
            return;
        };
        ops.push_back(op.clone());
        while ops.len() > self.config.max_cached_ops {
            ops.pop_front();
        }
    }

    /// Drop the actor's cached state.
    pub fn reset(&self, actor: ActorId) {
        if let Ok(mut caches) = self.caches.lock() {
            caches.remove(&actor);
        }
    }

    /// Evaluate the detectors in fixed order; first hit wins.
    pub fn analyze(&self, actor: ActorId) -> Result<Option<Anomaly>, CoreError> {
        let now = Utc::now();
        let cutoff = now
            - chrono::Duration::from_std(self.config.window).unwrap_or(chrono::Duration::MAX);

        let ops = self.window_ops(actor, cutoff);
        let failures = self.failed_data_audits(actor, cutoff)?;

        // 1. high_volume
        if ops.len() > self.config.max_ops_per_window {
            return Ok(Some(Anomaly {
                kind: AnomalyKind::HighVolume,
                severity: AnomalyKind::HighVolume.severity(),
                actor,
                detail: format!(
                    "{} operations in {}s window (limit {})",
                    ops.len(),
                    self.config.window.as_secs(),
                    self.config.max_ops_per_window
                ),
            }));
        }

        // 2. high_failure_rate. Failures only ever appear in the audit
        //    stream, so the denominator is windowed successes + failures.
        let total = ops.len() + failures.len();
        if total > 0 {
            let ratio = failures.len() as f64 / total as f64;
            if ratio >= self.config.failure_ratio_threshold {
                return Ok(Some(Anomaly {
                    kind: AnomalyKind::HighFailureRate,
                    severity: AnomalyKind::HighFailureRate.severity(),
                    actor,
                    detail: format!("{} of {} operations failed", failures.len(), total),
                }));
            }
        }

        // 3. revoked_key_usage
        let revoked_attempts = failures
            .iter()
            .filter(|r| failure_indicates_inactive_key(r))
            .count();
        if revoked_attempts >= self.config.revoked_key_attempts_threshold {
            return Ok(Some(Anomaly {
                kind: AnomalyKind::RevokedKeyUsage,
                severity: AnomalyKind::RevokedKeyUsage.severity(),
                actor,
                detail: format!("{} attempts against a non-active key", revoked_attempts),
            }));
        }

        // 4. unusual_time
        if let Some(op) = ops.iter().find(|op| self.outside_working_hours(op.timestamp)) {
            return Ok(Some(Anomaly {
                kind: AnomalyKind::UnusualTime,
                severity: AnomalyKind::UnusualTime.severity(),
                actor,
                detail: format!(
                    "operation at {} outside working hours {:02}:00-{:02}:00",
                    op.timestamp.with_timezone(&Local).format("%H:%M"),
                    self.config.working_hours.0,
                    self.config.working_hours.1
                ),
            }));
        }

        Ok(None)
    }

    /// Write an anomaly into the audit log.
    pub fn record(&self, anomaly: &Anomaly) -> Result<AuditRecord, CoreError> {
        self.audit.record(
            AuditEntry::new(AuditAction::AnomalyDetected, AuditStatus::Warning)
                .with_actor(anomaly.actor)
                .with_resource(anomaly.kind.as_str())
                .with_detail("type", anomaly.kind.as_str())
                .with_detail("severity", anomaly.severity.as_str())
                .with_detail("detail", anomaly.detail.clone()),
        )
    }

    /// Analyze and, on a hit, record it, unless an identical alert type for
    /// this actor is already newer than one window. Without the suppression
    /// a single burst would emit the same alert after every operation.
    pub fn analyze_and_record(&self, actor: ActorId) -> Result<Option<Anomaly>, CoreError> {
        let Some(anomaly) = self.analyze(actor)? else {
            return Ok(None);
        };
        if !self.recently_alerted(actor, anomaly.kind)? {
            self.record(&anomaly)?;
        }
        Ok(Some(anomaly))
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn cache_for(&self, actor: ActorId) -> OpCache {
        let mut caches = match self.caches.lock() {
            Ok(caches) => caches,
            Err(poisoned) => poisoned.into_inner(),
        };
        caches
            .entry(actor)
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .clone()
    }

    /// Snapshot of the actor's cached operations inside the window. Prunes
    /// aged entries as a side effect.
    fn window_ops(&self, actor: ActorId, cutoff: DateTime<Utc>) -> Vec<OperationRecord> {
        let cache = self.cache_for(actor);
        let Ok(mut ops) = cache.lock() else {
            return Vec::new();
        };
        while ops.front().map_or(false, |op| op.timestamp < cutoff) {
            ops.pop_front();
        }
        ops.iter().cloned().collect()
    }

    /// Windowed FAILED DATA_* audits for the actor. `ANOMALY_DETECTED`
    /// records carry WARNING status and a different action, so the
    /// detector's own output never matches here.
    fn failed_data_audits(
        &self,
        actor: ActorId,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AuditRecord>, CoreError> {
        let mut failures = Vec::new();
        for action in [AuditAction::DataEncrypt, AuditAction::DataDecrypt] {
            let filter = AuditFilter {
                actor: Some(actor),
                action: Some(action),
                status: Some(AuditStatus::Failed),
            };
            // Newest first; records past the cutoff end the scan.
            for record in self.audit.query(&filter, self.config.max_cached_ops, 0)? {
                if record.timestamp < cutoff {
                    break;
                }
                failures.push(record);
            }
        }
        Ok(failures)
    }

    fn recently_alerted(&self, actor: ActorId, kind: AnomalyKind) -> Result<bool, CoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.window).unwrap_or(chrono::Duration::MAX);
        let filter = AuditFilter {
            actor: Some(actor),
            action: Some(AuditAction::AnomalyDetected),
            status: Some(AuditStatus::Warning),
        };
        for record in self.audit.query(&filter, self.config.max_cached_ops, 0)? {
            if record.timestamp < cutoff {
                break;
            }
            if record.resource.as_deref() == Some(kind.as_str()) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn outside_working_hours(&self, timestamp: DateTime<Utc>) -> bool {
        let (start, end) = self.config.working_hours;
        let hour = timestamp.with_timezone(&Local).hour();
        hour < start || hour >= end
    }
}

/// Whether a FAILED audit record points at a use of a non-active key.
fn failure_indicates_inactive_key(record: &AuditRecord) -> bool {
    record
        .details
        .get("error")
        .and_then(|v| v.as_str())
        .map_or(false, |s| s == "KeyNotActive" || s.contains("not active"))
}
