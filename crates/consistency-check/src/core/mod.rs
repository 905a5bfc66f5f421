//! Core abstractions for dialect-independent consistency checking.
//!
//! - [`schema`]: table and column metadata
//! - [`value`]: SQL value representation and canonical rendering
//! - [`traits`]: the SQL execution handle and the dialect strategy
//! - [`identifier`]: identifier validation and quoting

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{sql_type_code, ColumnMeta, TableMeta, TableRef};
pub use traits::{Dialect, SqlConnection};
pub use value::{Row, SqlValue};
