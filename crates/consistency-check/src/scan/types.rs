//! Type definitions for consistency scans.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::check::CheckMethod;
use crate::config::{CheckConfig, CheckMode, ChunkSize};
use crate::digest::DigestResult;
use crate::error::{CheckError, Result};

/// Scan behaviour, resolved from [`CheckConfig`].
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub mode: CheckMode,
    pub method: CheckMethod,
    /// Explicit lower bound; measured on the reference when unset.
    pub row_from: Option<i64>,
    /// Explicit upper bound (exclusive); measured on the reference when unset.
    pub row_till: Option<i64>,
    pub chunk_size: ChunkSize,
    pub chunk_pause: Duration,
    /// Drill-down stops once a failing block is this small.
    pub granularity: i64,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub check_names: bool,
    pub check_types: bool,
    /// Fetch the rows of every inconsistent block from both nodes.
    pub show_rows: bool,
}

impl ScanOptions {
    pub fn from_config(config: &CheckConfig) -> Result<Self> {
        if config.granularity == 0 {
            return Err(CheckError::Config("check.granularity must be at least 1".into()));
        }
        Ok(Self {
            mode: config.mode,
            method: CheckMethod::parse(&config.method)?,
            row_from: config.row_from,
            row_till: config.row_till,
            chunk_size: config.chunk_size,
            chunk_pause: Duration::from_millis(config.chunk_pause_ms),
            granularity: config.granularity.min(i64::MAX as u64) as i64,
            timeout: Duration::from_secs(config.timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            check_names: config.check_names,
            check_types: config.check_types,
            show_rows: config.show_rows,
        })
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            mode: CheckMode::Direct,
            method: CheckMethod::PrimaryKey,
            row_from: None,
            row_till: None,
            chunk_size: ChunkSize::default(),
            chunk_pause: Duration::ZERO,
            granularity: 1,
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(50),
            check_names: true,
            check_types: true,
            show_rows: false,
        }
    }
}

/// A block of rows that differs between the reference and one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inconsistency {
    pub table: String,
    pub target: String,
    /// Id of the check that localized the block.
    pub check_id: i64,
    pub start: i64,
    pub size: i64,
    pub reference: Option<DigestResult>,
    pub local: Option<DigestResult>,
    /// Canonical row values on the reference (when rows are materialized).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_rows: Vec<Vec<String>>,
    /// Canonical row values on the target (when rows are materialized).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_rows: Vec<Vec<String>>,
}

/// A check that could not be completed. Not fatal to the scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckFailure {
    pub table: String,
    pub target: Option<String>,
    pub start: i64,
    pub size: i64,
    pub error: String,
}

/// Outcome of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Consistent,
    Inconsistent,
    Failed,
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanStatus::Consistent => write!(f, "consistent"),
            ScanStatus::Inconsistent => write!(f, "inconsistent"),
            ScanStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Result of scanning one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableScanResult {
    pub table: String,
    pub mode: CheckMode,
    pub method: CheckMethod,
    pub row_from: i64,
    pub row_till: i64,
    pub chunk_size: i64,
    /// Top-level chunks checked.
    pub chunks_checked: usize,
    /// Checks issued, drill-down included.
    pub checks_issued: usize,
    pub inconsistencies: Vec<Inconsistency>,
    pub failures: Vec<CheckFailure>,
    /// Error that stopped the table scan before any chunk ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl TableScanResult {
    pub fn new(table: impl Into<String>, mode: CheckMode, method: CheckMethod) -> Self {
        Self {
            table: table.into(),
            mode,
            method,
            row_from: 0,
            row_till: 0,
            chunk_size: 0,
            chunks_checked: 0,
            checks_issued: 0,
            inconsistencies: Vec::new(),
            failures: Vec::new(),
            error: None,
            duration_ms: 0,
        }
    }

    pub fn status(&self) -> ScanStatus {
        if self.error.is_some() || !self.failures.is_empty() {
            ScanStatus::Failed
        } else if !self.inconsistencies.is_empty() {
            ScanStatus::Inconsistent
        } else {
            ScanStatus::Consistent
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.status() == ScanStatus::Consistent
    }
}

/// Aggregate result of a multi-table scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSummary {
    pub tables_checked: usize,
    pub tables_consistent: usize,
    pub tables_inconsistent: usize,
    pub tables_failed: usize,
    pub checks_issued: usize,
    pub inconsistencies: usize,
    pub duration_ms: u64,
    pub tables: Vec<TableScanResult>,
}

impl ScanSummary {
    pub fn new() -> Self {
        Self {
            tables_checked: 0,
            tables_consistent: 0,
            tables_inconsistent: 0,
            tables_failed: 0,
            checks_issued: 0,
            inconsistencies: 0,
            duration_ms: 0,
            tables: Vec::new(),
        }
    }

    /// Add a table result.
    pub fn add_table(&mut self, result: TableScanResult) {
        self.tables_checked += 1;
        match result.status() {
            ScanStatus::Consistent => self.tables_consistent += 1,
            ScanStatus::Inconsistent => self.tables_inconsistent += 1,
            ScanStatus::Failed => self.tables_failed += 1,
        }
        self.checks_issued += result.checks_issued;
        self.inconsistencies += result.inconsistencies.len();
        self.tables.push(result);
    }

    pub fn status(&self) -> ScanStatus {
        if self.tables_failed > 0 {
            ScanStatus::Failed
        } else if self.tables_inconsistent > 0 {
            ScanStatus::Inconsistent
        } else {
            ScanStatus::Consistent
        }
    }

    /// Every table checked and found consistent.
    pub fn passed(&self) -> bool {
        self.status() == ScanStatus::Consistent
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for ScanSummary {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress update, sent after every top-level chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgressUpdate {
    pub table: String,
    pub chunks_total: usize,
    pub chunks_completed: usize,
    pub checks_issued: usize,
    pub inconsistencies_found: usize,
}
