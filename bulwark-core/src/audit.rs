//! Append-only recorders: the audit log and the operations log.
//!
//! Two separate streams: the operations log records successful
//! encrypt/decrypt only, while the audit log records every action including
//! failures. The anomaly detector reads both.
//!
//! Audit records are hash-chained: each record carries the SHA-256 hex of
//! the previous record's JSON, so a verifier can replay the log and detect
//! insertion, deletion, or modification.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::CoreError;
use crate::types::{
    ActorId, AuditAction, AuditRecord, AuditStatus, KeyAlgorithm, KeyId, OperationKind,
    OperationRecord, Outcome,
};

/// Genesis link for the audit hash chain.
const CHAIN_GENESIS: &[u8] = b"bulwark-audit-genesis";

// ---------------------------------------------------------------------------
// Audit entries (unstamped records)
// ---------------------------------------------------------------------------

/// An audit record before the log stamps id, timestamp, and chain hash.
#[derive(Clone, Debug)]
pub struct AuditEntry {
    pub actor: Option<ActorId>,
    pub action: AuditAction,
    pub resource: Option<String>,
    pub status: AuditStatus,
    pub client_address: Option<String>,
    pub client_agent: Option<String>,
    pub details: BTreeMap<String, serde_json::Value>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, status: AuditStatus) -> Self {
        Self {
            actor: None,
            action,
            resource: None,
            status,
            client_address: None,
            client_agent: None,
            details: BTreeMap::new(),
        }
    }

    pub fn with_actor(mut self, actor: ActorId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_client(
        mut self,
        address: Option<String>,
        agent: Option<String>,
    ) -> Self {
        self.client_address = address;
        self.client_agent = agent;
        self
    }

    pub fn with_detail(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Audit sinks (mirroring)
// ---------------------------------------------------------------------------

/// Optional mirror for recorded audit records. Implement this for your
/// SIEM/log system; the in-process log remains the source of truth.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord);
}

/// Mirrors records via the `tracing` crate.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) {
        tracing::info!(
            id = record.id,
            actor = ?record.actor,
            action = %record.action,
            resource = ?record.resource,
            status = %record.status,
            "audit"
        );
    }
}

/// Appends JSON lines to a file.
pub struct FileAuditSink {
    path: std::path::PathBuf,
}

impl FileAuditSink {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, record: &AuditRecord) {
        use std::io::Write;
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        {
            Ok(mut file) => match serde_json::to_string(record) {
                Ok(json) => {
                    if let Err(e) = writeln!(file, "{}", json) {
                        tracing::error!("audit mirror write error: {}", e);
                    }
                }
                Err(e) => tracing::error!("audit mirror serialize error: {}", e),
            },
            Err(e) => tracing::error!("audit mirror cannot open {:?}: {}", self.path, e),
        }
    }
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

/// Equality filters for audit queries.
#[derive(Clone, Copy, Debug, Default)]
pub struct AuditFilter {
    pub actor: Option<ActorId>,
    pub action: Option<AuditAction>,
    pub status: Option<AuditStatus>,
}

impl AuditFilter {
    fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(actor) = self.actor {
            if record.actor != Some(actor) {
                return false;
            }
        }
        if let Some(action) = self.action {
            if record.action != action {
                return false;
            }
        }
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        true
    }
}

/// The append-only audit log. Single writer behind a mutex; ids strictly
/// increase; no deletion API exists.
pub struct AuditLog {
    state: Mutex<ChainState>,
    mirror: Option<Arc<dyn AuditSink>>,
}

struct ChainState {
    records: Vec<AuditRecord>,
    next_id: u64,
    prev_hash: String,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                records: Vec::new(),
                next_id: 1,
                prev_hash: format!("{:x}", Sha256::digest(CHAIN_GENESIS)),
            }),
            mirror: None,
        }
    }

    pub fn with_mirror(mirror: Arc<dyn AuditSink>) -> Self {
        let mut log = Self::new();
        log.mirror = Some(mirror);
        log
    }

    /// Stamp and append an entry, returning the finished record.
    pub fn record(&self, entry: AuditEntry) -> Result<AuditRecord, CoreError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| CoreError::PersistenceFailure("audit lock poisoned".into()))?;

        let record = AuditRecord {
            id: state.next_id,
            actor: entry.actor,
            action: entry.action,
            resource: entry.resource,
            status: entry.status,
            client_address: entry.client_address,
            client_agent: entry.client_agent,
            details: entry.details,
            timestamp: Utc::now(),
            prev_hash: state.prev_hash.clone(),
        };

        // Next link hashes the complete record JSON, prev_hash included.
        if let Ok(json) = serde_json::to_string(&record) {
            state.prev_hash = format!("{:x}", Sha256::digest(json.as_bytes()));
        }
        state.next_id += 1;
        state.records.push(record.clone());
        drop(state);

        if let Some(mirror) = &self.mirror {
            mirror.record(&record);
        }
        Ok(record)
    }

    /// Query with equality filters, newest first.
    pub fn query(
        &self,
        filter: &AuditFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditRecord>, CoreError> {
        let state = self
            .state
            .lock()
            .map_err(|_| CoreError::PersistenceFailure("audit lock poisoned".into()))?;
        Ok(state
            .records
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    /// Total records matching the filter.
    pub fn count(&self, filter: &AuditFilter) -> Result<u64, CoreError> {
        let state = self
            .state
            .lock()
            .map_err(|_| CoreError::PersistenceFailure("audit lock poisoned".into()))?;
        Ok(state.records.iter().filter(|r| filter.matches(r)).count() as u64)
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replay the hash chain. Returns false when any record was inserted,
    /// removed, or modified after the fact.
    pub fn verify_chain(&self) -> bool {
        let Ok(state) = self.state.lock() else {
            return false;
        };
        let mut expected = format!("{:x}", Sha256::digest(CHAIN_GENESIS));
        for record in &state.records {
            if record.prev_hash != expected {
                return false;
            }
            match serde_json::to_string(record) {
                Ok(json) => expected = format!("{:x}", Sha256::digest(json.as_bytes())),
                Err(_) => return false,
            }
        }
        true
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Operations log
// ---------------------------------------------------------------------------

/// The append-only stream of successful cryptographic operations.
pub struct OperationsLog {
    state: Mutex<OpsState>,
}

struct OpsState {
    records: Vec<OperationRecord>,
    next_id: u64,
}

impl OperationsLog {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(OpsState {
                records: Vec::new(),
                next_id: 1,
            }),
        }
    }

    pub fn record(
        &self,
        actor: ActorId,
        key_internal_id: Option<KeyId>,
        kind: OperationKind,
        algorithm: KeyAlgorithm,
        resource_label: Option<String>,
    ) -> Result<OperationRecord, CoreError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| CoreError::PersistenceFailure("operations lock poisoned".into()))?;
        let record = OperationRecord {
            id: state.next_id,
            actor,
            key_internal_id,
            kind,
            algorithm,
            resource_label,
            outcome: Outcome::Success,
            timestamp: Utc::now(),
        };
        state.next_id += 1;
        state.records.push(record.clone());
        Ok(record)
    }

    /// Newest first. `actor = None` lists across all actors.
    pub fn list(
        &self,
        actor: Option<ActorId>,
        limit: usize,
    ) -> Result<Vec<OperationRecord>, CoreError> {
        let state = self
            .state
            .lock()
            .map_err(|_| CoreError::PersistenceFailure("operations lock poisoned".into()))?;
        Ok(state
            .records
            .iter()
            .rev()
            .filter(|r| actor.map_or(true, |a| r.actor == a))
            .take(limit)
            .cloned()
            .collect())
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for OperationsLog {
    fn default() -> Self {
        Self::new()
    }
}
