//! Table and column metadata used by the digest engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CheckError, Result};

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    /// Schema (MySQL database) name.
    pub schema: String,
    /// Table name.
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Get the fully qualified name (schema.table).
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Column name.
    pub name: String,

    /// Data type name as reported by `information_schema`.
    pub data_type: String,

    /// Portable SQL type code derived from `data_type`.
    pub type_code: i32,

    /// Ordinal position in the table.
    pub ordinal_pos: i32,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, ordinal_pos: i32) -> Self {
        let data_type = data_type.into();
        Self {
            name: name.into(),
            type_code: sql_type_code(&data_type),
            data_type,
            ordinal_pos,
        }
    }

    /// Whether this column holds an integer type usable as a range key.
    pub fn is_integer(&self) -> bool {
        is_integer_type(&self.data_type)
    }
}

/// Columns and primary key of one table on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    /// Which table this describes.
    pub table: TableRef,

    /// Columns in ordinal order.
    pub columns: Vec<ColumnMeta>,

    /// Primary key column names in key order.
    pub primary_key: Vec<String>,
}

impl TableMeta {
    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Column names in ordinal order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Find a column by name (case-insensitive).
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Ordering columns: the primary key, or every column when there is none.
    pub fn order_columns(&self) -> Vec<&str> {
        if self.has_pk() {
            self.primary_key.iter().map(String::as_str).collect()
        } else {
            self.column_names()
        }
    }

    /// The single integer key column required by key-range checks.
    ///
    /// # Errors
    ///
    /// `UnsupportedKeyShape` when the table has no key, a composite key, or a
    /// key column that is not an integer.
    pub fn single_integer_key(&self) -> Result<&ColumnMeta> {
        let table = self.table.full_name();
        match self.primary_key.as_slice() {
            [] => Err(CheckError::key_shape(table, "table has no primary key")),
            [name] => {
                let col = self.column(name).ok_or_else(|| {
                    CheckError::key_shape(
                        table.clone(),
                        format!("primary key column {} not found", name),
                    )
                })?;
                if col.is_integer() {
                    Ok(col)
                } else {
                    Err(CheckError::key_shape(
                        table,
                        format!("primary key column {} is {}, not an integer", name, col.data_type),
                    ))
                }
            }
            cols => Err(CheckError::key_shape(
                table,
                format!("composite primary key ({})", cols.join(", ")),
            )),
        }
    }
}

/// Check whether an `information_schema` data type is an integer type.
pub fn is_integer_type(data_type: &str) -> bool {
    matches!(
        normalize_type(data_type).as_str(),
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "int2" | "int4"
            | "int8" | "serial" | "bigserial"
    )
}

/// Map a data type name to its `java.sql.Types` code.
///
/// Both dialects report their own spelling (`int` vs `integer`, `datetime` vs
/// `timestamp without time zone`); equivalent logical types map to the same
/// code so that type-salted digests agree across dialects.
pub fn sql_type_code(data_type: &str) -> i32 {
    match normalize_type(data_type).as_str() {
        "bit" => -7,
        "tinyint" => -6,
        "smallint" | "int2" => 5,
        "int" | "integer" | "mediumint" | "int4" | "serial" => 4,
        "bigint" | "int8" | "bigserial" => -5,
        "real" | "float4" | "float" => 7,
        "double" | "double precision" | "float8" => 8,
        "decimal" | "numeric" => 3,
        "char" | "character" | "bpchar" | "enum" | "set" => 1,
        "varchar" | "character varying" => 12,
        "text" | "tinytext" | "mediumtext" | "longtext" => -1,
        "date" => 91,
        "time" | "time without time zone" => 92,
        "datetime" | "timestamp" | "timestamp without time zone" => 93,
        "timestamp with time zone" | "timestamptz" => 2014,
        "time with time zone" | "timetz" => 2013,
        "bool" | "boolean" => 16,
        "binary" => -2,
        "varbinary" => -3,
        "blob" | "tinyblob" | "mediumblob" | "longblob" | "bytea" => -4,
        _ => 1111,
    }
}

fn normalize_type(data_type: &str) -> String {
    let lower = data_type.trim().to_lowercase();
    let base = lower.split('(').next().unwrap_or(&lower).trim();
    base.trim_end_matches(" unsigned").to_string()
}
