//! Check descriptors and their wire form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::TableRef;
use crate::error::{CheckError, Result};

/// Magic/version prefix of a serialized descriptor.
pub const DESCRIPTOR_MAGIC: &[u8; 4] = b"CCK1";

/// How a check selects its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckMethod {
    /// Row window (LIMIT/OFFSET) over the ordered table.
    #[serde(rename = "limit")]
    Position,
    /// Key range over a single integer primary key.
    #[serde(rename = "pk")]
    PrimaryKey,
}

impl CheckMethod {
    /// Parse a method name.
    ///
    /// Accepts `position`/`limit` and `primary-key`/`pk`, case-insensitively.
    pub fn parse(method: &str) -> Result<Self> {
        match method.trim().to_lowercase().as_str() {
            "position" | "limit" => Ok(CheckMethod::Position),
            "primary-key" | "primary_key" | "pk" => Ok(CheckMethod::PrimaryKey),
            _ => Err(CheckError::InvalidMethod(method.to_string())),
        }
    }

    /// Name stored in the result store.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckMethod::Position => "limit",
            CheckMethod::PrimaryKey => "pk",
        }
    }
}

impl FromStr for CheckMethod {
    type Err = CheckError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CheckMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row window (position) or key window (primary key) of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRange {
    /// First row position or first key value.
    pub offset: i64,
    /// Number of rows or key values.
    pub limit: i64,
}

impl CheckRange {
    /// End of the window, exclusive.
    pub fn end(&self) -> i64 {
        self.offset.saturating_add(self.limit)
    }
}

/// Immutable description of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckDescriptor {
    id: i64,
    table: TableRef,
    range: Option<CheckRange>,
    method: CheckMethod,
    check_names: bool,
    check_types: bool,
}

#[derive(Serialize, Deserialize)]
struct DescriptorWire {
    id: i64,
    schema: String,
    table: String,
    #[serde(default)]
    row_offset: Option<i64>,
    #[serde(default)]
    row_limit: Option<i64>,
    method: CheckMethod,
    check_names: bool,
    check_types: bool,
}

impl CheckDescriptor {
    /// Build a descriptor from loosely-typed inputs.
    ///
    /// A missing offset with a limit means "from the start"; an offset
    /// without a limit is rejected.
    ///
    /// # Errors
    ///
    /// `InvalidMethod` for an unknown method name, `MalformedDescriptor` for an
    /// inconsistent range.
    pub fn create(
        id: i64,
        table: TableRef,
        offset: Option<i64>,
        limit: Option<i64>,
        method: &str,
        check_names: bool,
        check_types: bool,
    ) -> Result<Self> {
        let method = CheckMethod::parse(method)?;
        let range = build_range(offset, limit)?;
        Ok(Self {
            id,
            table,
            range,
            method,
            check_names,
            check_types,
        })
    }

    /// Build a descriptor with an already-parsed method.
    pub fn new(
        id: i64,
        table: TableRef,
        range: Option<CheckRange>,
        method: CheckMethod,
        check_names: bool,
        check_types: bool,
    ) -> Self {
        Self {
            id,
            table,
            range,
            method,
            check_names,
            check_types,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn schema(&self) -> &str {
        &self.table.schema
    }

    pub fn table_name(&self) -> &str {
        &self.table.name
    }

    /// `None` means the whole table.
    pub fn range(&self) -> Option<CheckRange> {
        self.range
    }

    pub fn method(&self) -> CheckMethod {
        self.method
    }

    pub fn check_names(&self) -> bool {
        self.check_names
    }

    pub fn check_types(&self) -> bool {
        self.check_types
    }

    /// Serialize to the wire form: magic prefix followed by a JSON body.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let wire = DescriptorWire {
            id: self.id,
            schema: self.table.schema.clone(),
            table: self.table.name.clone(),
            row_offset: self.range.map(|r| r.offset),
            row_limit: self.range.map(|r| r.limit),
            method: self.method,
            check_names: self.check_names,
            check_types: self.check_types,
        };
        let mut out = DESCRIPTOR_MAGIC.to_vec();
        serde_json::to_writer(&mut out, &wire)?;
        Ok(out)
    }

    /// Deserialize from the wire form.
    ///
    /// # Errors
    ///
    /// `MalformedDescriptor` when the bytes lack the magic prefix, are not
    /// valid JSON, or describe an invalid descriptor.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let body = bytes
            .strip_prefix(DESCRIPTOR_MAGIC.as_slice())
            .ok_or_else(|| CheckError::MalformedDescriptor("missing magic prefix".into()))?;
        let wire: DescriptorWire = serde_json::from_slice(body)
            .map_err(|e| CheckError::MalformedDescriptor(e.to_string()))?;
        if wire.schema.is_empty() || wire.table.is_empty() {
            return Err(CheckError::MalformedDescriptor(
                "empty schema or table name".into(),
            ));
        }
        let range = build_range(wire.row_offset, wire.row_limit)?;
        Ok(Self {
            id: wire.id,
            table: TableRef::new(wire.schema, wire.table),
            range,
            method: wire.method,
            check_names: wire.check_names,
            check_types: wire.check_types,
        })
    }
}

fn build_range(offset: Option<i64>, limit: Option<i64>) -> Result<Option<CheckRange>> {
    match (offset, limit) {
        (None, None) => Ok(None),
        (Some(offset), None) => Err(CheckError::MalformedDescriptor(format!(
            "offset {} given without a limit",
            offset
        ))),
        (_, Some(limit)) if limit < 0 => Err(CheckError::MalformedDescriptor(format!(
            "negative limit {}",
            limit
        ))),
        (offset, Some(limit)) => Ok(Some(CheckRange {
            offset: offset.unwrap_or(0),
            limit,
        })),
    }
}

impl fmt::Display for CheckDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}#{}", self.table.schema, self.table.name, self.id)
    }
}
