//! Configuration type definitions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CheckError, Result};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Authoritative node every target is compared against.
    pub reference: NodeConfig,

    /// Nodes validated against the reference.
    #[serde(default)]
    pub targets: Vec<NodeConfig>,

    /// Scan behaviour.
    #[serde(default)]
    pub check: CheckConfig,

    /// Result store location and retention.
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    /// Schema whose tables are checked.
    ///
    /// Defaults to the reference database on MySQL and `public` on PostgreSQL.
    pub fn check_schema(&self) -> String {
        match &self.check.schema {
            Some(schema) => schema.clone(),
            None if self.reference.r#type == "postgres" => "public".to_string(),
            None => self.reference.database.clone(),
        }
    }
}

/// Connection settings for one node.
#[derive(Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Display name used in logs and reports (default: host:port).
    #[serde(default)]
    pub name: String,

    /// Database type: "mysql" or "postgres".
    #[serde(default = "default_mysql")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 3306 for MySQL, 5432 for PostgreSQL).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// SSL mode (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,
}

impl fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConfig")
            .field("name", &self.name)
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port())
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl NodeConfig {
    /// Port, falling back to the engine default.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(match self.r#type.as_str() {
            "postgres" => 5432,
            _ => 3306,
        })
    }

    /// Name used in logs and reports.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("{}:{}", self.host, self.port())
        } else {
            self.name.clone()
        }
    }
}

/// How checks reach the target nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckMode {
    /// Orchestrator computes digests on every node itself.
    #[default]
    Direct,
    /// Check issued once on the reference and delivered through replication.
    Replicated,
}

impl FromStr for CheckMode {
    type Err = CheckError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "direct" => Ok(CheckMode::Direct),
            "replicated" => Ok(CheckMode::Replicated),
            other => Err(CheckError::Config(format!(
                "check.mode must be 'direct' or 'replicated', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for CheckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckMode::Direct => write!(f, "direct"),
            CheckMode::Replicated => write!(f, "replicated"),
        }
    }
}

/// Requested chunk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ChunkSizeRepr", into = "String")]
pub enum ChunkSize {
    /// Rows per chunk, rounded up to a power of two.
    Rows(u64),
    /// Check the whole range in one pass.
    Single,
}

impl Default for ChunkSize {
    fn default() -> Self {
        ChunkSize::Rows(1024)
    }
}

impl FromStr for ChunkSize {
    type Err = CheckError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("single") {
            return Ok(ChunkSize::Single);
        }
        match s.parse::<u64>() {
            Ok(0) | Err(_) => Err(CheckError::Config(format!(
                "chunk size must be a positive number or 'single', got '{}'",
                s
            ))),
            Ok(n) => Ok(ChunkSize::Rows(n)),
        }
    }
}

impl fmt::Display for ChunkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkSize::Rows(n) => write!(f, "{}", n),
            ChunkSize::Single => write!(f, "single"),
        }
    }
}

impl From<ChunkSize> for String {
    fn from(size: ChunkSize) -> Self {
        size.to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChunkSizeRepr {
    Rows(u64),
    Text(String),
}

impl TryFrom<ChunkSizeRepr> for ChunkSize {
    type Error = CheckError;

    fn try_from(repr: ChunkSizeRepr) -> Result<Self> {
        match repr {
            ChunkSizeRepr::Rows(n) => ChunkSize::from_str(&n.to_string()),
            ChunkSizeRepr::Text(s) => ChunkSize::from_str(&s),
        }
    }
}

/// Scan behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Direct or replicated (default: direct).
    #[serde(default)]
    pub mode: CheckMode,

    /// Digest method: "pk"/"primary-key" or "limit"/"position" (default: pk).
    #[serde(default = "default_method")]
    pub method: String,

    /// Schema to check (default: reference database, or "public" on PostgreSQL).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Tables to check. Empty means every base table in the schema.
    #[serde(default)]
    pub tables: Vec<String>,

    /// First row (position) or key (pk) to check. Measured when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_from: Option<i64>,

    /// End of the range, exclusive. Measured when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_till: Option<i64>,

    /// Rows per top-level chunk (default: 1024).
    #[serde(default)]
    pub chunk_size: ChunkSize,

    /// Pause between top-level chunks in milliseconds (default: 0).
    #[serde(default)]
    pub chunk_pause_ms: u64,

    /// Drill-down stops at chunks of this many rows (default: 1).
    #[serde(default = "default_granularity")]
    pub granularity: u64,

    /// Seconds to wait for a target to resolve a check (default: 60).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Interval between result store polls in milliseconds (default: 50).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Salt digests with column names (default: true).
    #[serde(default = "default_true")]
    pub check_names: bool,

    /// Salt digests with column types (default: true).
    #[serde(default = "default_true")]
    pub check_types: bool,

    /// Materialize divergent rows in the report (default: false).
    #[serde(default)]
    pub show_rows: bool,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            mode: CheckMode::default(),
            method: default_method(),
            schema: None,
            tables: Vec::new(),
            row_from: None,
            row_till: None,
            chunk_size: ChunkSize::default(),
            chunk_pause_ms: 0,
            granularity: default_granularity(),
            timeout_secs: default_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            check_names: true,
            check_types: true,
            show_rows: false,
        }
    }
}

/// Result store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Schema holding the `consistency` table (default: "repl_meta").
    #[serde(default = "default_metadata_schema")]
    pub metadata_schema: String,

    /// Purge result rows older than this many days before a scan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            metadata_schema: default_metadata_schema(),
            retention_days: None,
        }
    }
}

fn default_mysql() -> String {
    "mysql".to_string()
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_method() -> String {
    "pk".to_string()
}

fn default_granularity() -> u64 {
    1
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_metadata_schema() -> String {
    "repl_meta".to_string()
}

fn default_true() -> bool {
    true
}
