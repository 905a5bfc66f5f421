//! Error types for consistency checking.

use std::time::Duration;

use thiserror::Error;

/// Main error type for consistency-check operations.
#[derive(Error, Debug)]
pub enum CheckError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Digest method string is not one of the supported methods
    #[error("Invalid check method '{0}'. Supported methods: position (limit), primary-key (pk)")]
    InvalidMethod(String),

    /// Bytes did not decode into a check descriptor
    #[error("Malformed check descriptor: {0}")]
    MalformedDescriptor(String),

    /// The connection declares an engine no digest binding exists for
    #[error("Unsupported SQL dialect '{0}'. Supported dialects: mysql, postgres")]
    UnsupportedDialect(String),

    /// Key-based checks need a single-column integer primary key
    #[error("Table {table} cannot be checked by primary key: {reason}")]
    UnsupportedKeyShape { table: String, reason: String },

    /// Target never produced a comparable result within the deadline
    #[error("Check {table}#{id} timed out after {timeout:?} waiting for {node}")]
    CheckTimeout {
        table: String,
        id: i64,
        node: String,
        timeout: Duration,
    },

    /// A query failed inside a dialect driver
    #[error("{dialect} query failed: {message}")]
    DialectExecution {
        dialect: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Result row (or table metadata) was not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Scan was cancelled (SIGINT, etc.)
    #[error("Scan cancelled")]
    Cancelled,
}

impl CheckError {
    /// Wrap a driver error with the dialect it came from.
    pub fn dialect<E>(dialect: impl Into<String>, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CheckError::DialectExecution {
            dialect: dialect.into(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Create a dialect execution error without an underlying driver error.
    pub fn execution(dialect: impl Into<String>, message: impl Into<String>) -> Self {
        CheckError::DialectExecution {
            dialect: dialect.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create an UnsupportedKeyShape error
    pub fn key_shape(table: impl Into<String>, reason: impl Into<String>) -> Self {
        CheckError::UnsupportedKeyShape {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Errors that abort the whole scan.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CheckError::CheckTimeout { .. } | CheckError::Cancelled)
    }

    /// Process exit code for the CLI. Every failure maps to 1.
    pub fn exit_code(&self) -> u8 {
        1
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for consistency-check operations.
pub type Result<T> = std::result::Result<T, CheckError>;
