//! Chained row digest.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::schema::ColumnMeta;
use crate::core::value::{hex, SqlValue};

/// Number of trailing hex characters kept from the running digest.
pub const DIGEST_LEN: usize = 32;

/// Count and digest of one ordered row range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestResult {
    pub count: i64,
    pub digest: String,
}

/// Lowercase hex SHA-256 of a string.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex(&hasher.finalize())
}

/// Salt derived from column metadata, or `None` when neither flag is set.
///
/// Tokens are emitted per column in column order: the name when
/// `check_names`, then the type code when `check_types`.
pub fn column_salt(columns: &[ColumnMeta], check_names: bool, check_types: bool) -> Option<String> {
    if !check_names && !check_types {
        return None;
    }
    let mut tokens = Vec::with_capacity(columns.len() * 2);
    for col in columns {
        if check_names {
            tokens.push(col.name.clone());
        }
        if check_types {
            tokens.push(col.type_code.to_string());
        }
    }
    Some(sha256_hex(&tokens.join(",")))
}

/// Running state of the chained digest.
///
/// Each row folds in as
/// `running = sha256(counter:016 + running + sha256(values.join(",")))`.
#[derive(Debug, Clone)]
pub struct DigestAccumulator {
    running: String,
    count: i64,
}

impl DigestAccumulator {
    /// Start from an explicit seed.
    pub fn new(seed: impl Into<String>) -> Self {
        Self {
            running: seed.into(),
            count: 0,
        }
    }

    /// Start from the column salt, or the empty string when unsalted.
    pub fn for_columns(columns: &[ColumnMeta], check_names: bool, check_types: bool) -> Self {
        Self::new(column_salt(columns, check_names, check_types).unwrap_or_default())
    }

    /// Fold one row of canonical values.
    pub fn push_rendered<S: AsRef<str>>(&mut self, values: &[S]) {
        let joined = values
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(",");
        let row_digest = sha256_hex(&joined);
        self.count += 1;
        self.running = sha256_hex(&format!("{:016}{}{}", self.count, self.running, row_digest));
    }

    /// Fold one decoded row.
    pub fn push_row(&mut self, row: &[SqlValue]) {
        let rendered: Vec<String> = row.iter().map(SqlValue::canonical_text).collect();
        self.push_rendered(&rendered);
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    /// Final count and the last 32 hex characters of the running digest.
    pub fn finish(self) -> DigestResult {
        let start = self.running.len().saturating_sub(DIGEST_LEN);
        DigestResult {
            count: self.count,
            digest: self.running[start..].to_string(),
        }
    }
}
