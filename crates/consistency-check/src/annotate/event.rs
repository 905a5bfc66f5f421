//! Change events as seen by replication filters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::check::CheckDescriptor;
use crate::core::value::Row;
use crate::digest::DigestResult;

/// Metadata key naming the check an event carries (`schema.table#id`).
pub const CHECK_METADATA_KEY: &str = "consistency_check";

/// Metadata key carrying the serialized descriptor of an issued check.
pub const DESCRIPTOR_METADATA_KEY: &str = "consistency_descriptor";

/// Metadata key / statement option holding the session time zone.
pub const TIME_ZONE_KEY: &str = "time_zone";

/// Canonical zone every recognized check event is normalized to.
pub const UTC_OFFSET: &str = "+00:00";

/// Row operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowAction {
    Insert,
    Update,
    Delete,
}

/// Column name and declared type within a row change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub type_name: String,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// One part of a replicated transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum EventFragment {
    /// A statement replayed verbatim.
    Statement {
        default_schema: Option<String>,
        query: String,
        options: BTreeMap<String, String>,
    },
    /// Row images for one table.
    ///
    /// `rows` hold the new column values; for updates and deletes `keys` hold
    /// the values identifying the affected rows.
    RowChanges {
        schema: String,
        table: String,
        action: RowAction,
        columns: Vec<ColumnSpec>,
        rows: Vec<Row>,
        key_columns: Vec<ColumnSpec>,
        keys: Vec<Row>,
    },
}

impl EventFragment {
    /// Statement fragment with no options.
    pub fn statement(default_schema: Option<&str>, query: impl Into<String>) -> Self {
        EventFragment::Statement {
            default_schema: default_schema.map(str::to_string),
            query: query.into(),
            options: BTreeMap::new(),
        }
    }

    /// Single-row insert.
    pub fn insert(schema: &str, table: &str, columns: Vec<ColumnSpec>, row: Row) -> Self {
        EventFragment::RowChanges {
            schema: schema.to_string(),
            table: table.to_string(),
            action: RowAction::Insert,
            columns,
            rows: vec![row],
            key_columns: Vec::new(),
            keys: Vec::new(),
        }
    }
}

/// What a recognized check write means for the target.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckWrite {
    /// The reference issued the check; the target computes its own digest.
    /// Carries the reference result when the issuing write included it.
    Issued { reference: Option<DigestResult> },
    /// The reference published its result for an already issued check.
    ReferenceResult(DigestResult),
}

/// Check recognized in an event by the annotator.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckAnnotation {
    pub descriptor: CheckDescriptor,
    pub write: CheckWrite,
}

/// One replicated transaction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChangeEvent {
    pub seqno: u64,
    /// Routing key; events with the same shard are applied in order.
    pub shard_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub fragments: Vec<EventFragment>,
    pub check: Option<CheckAnnotation>,
}

impl ChangeEvent {
    pub fn new(seqno: u64, fragments: Vec<EventFragment>) -> Self {
        Self {
            seqno,
            fragments,
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_check(&self) -> bool {
        self.check.is_some()
    }
}
