// Append-only audit trail of gated executions.
// This module provides:
// 1. The audit record written once per `execute()` call
// 2. The `AuditSink` seam the orchestrator writes through
// 3. A JSON-Lines file sink (one record per line, append only)
// 4. An in-memory sink for embedding and tests
//
// Sinks expose no rewrite or delete. Rotation, retention and querying are
// handled outside this crate.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::AuditError;
use crate::maker_checker::ExecutionResult;
use crate::types::RiskLevel;

/// One line of the audit log. Field set and order are the on-disk format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// When the record was created (RFC 3339, UTC)
    pub timestamp: DateTime<Utc>,
    /// Who invoked the action, resolved by the embedding process
    pub operator_id: String,
    pub risk_level: RiskLevel,
    pub success: bool,
    pub action_name: String,
    pub iterations_required: u32,
    pub execution_time_ms: u64,
}

impl AuditRecord {
    pub fn from_result(result: &ExecutionResult, operator_id: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operator_id: operator_id.into(),
            risk_level: result.risk_level,
            success: result.success,
            action_name: result.action_name.clone(),
            iterations_required: result.iterations_required,
            execution_time_ms: result.execution_time_ms,
        }
    }

    /// Serialize as a single JSON line including the trailing newline
    pub fn to_json_line(&self) -> Result<Vec<u8>, AuditError> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    /// Get a summary string for logging
    pub fn summary(&self) -> String {
        format!(
            "action={} risk={} operator={} success={} iterations={} time={}ms",
            self.action_name,
            self.risk_level,
            self.operator_id,
            self.success,
            self.iterations_required,
            self.execution_time_ms
        )
    }
}

/// Destination for audit records. Each `append` must be atomic with respect
/// to other appends on the same sink.
pub trait AuditSink: Send + Sync {
    fn append(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

// ================================================================================================
// FILE SINK
// ================================================================================================

/// JSON-Lines audit file opened in append mode
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    file: Mutex<File>,
    durable: bool,
}

impl AuditLog {
    /// Open (creating if needed) the audit file and any missing parent
    /// directories
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source| AuditError::Open {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(open_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(open_err)?;

        debug!("audit log opened at {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
            durable: false,
        })
    }

    /// Also `fsync` data after every append
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for AuditLog {
    fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let line = record.to_json_line()?;

        let mut file = self.file.lock();
        file.write_all(&line)?;
        file.flush()?;
        if self.durable {
            file.sync_data()?;
        }
        Ok(())
    }
}

// ================================================================================================
// MEMORY SINK
// ================================================================================================

/// Keeps records in process memory
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}
