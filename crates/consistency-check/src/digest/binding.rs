//! SQL fragments for one table on one dialect.

use crate::check::{CheckDescriptor, CheckMethod};
use crate::core::schema::TableMeta;
use crate::core::traits::Dialect;
use crate::core::value::SqlValue;
use crate::drivers::DialectImpl;
use crate::error::{CheckError, Result};

/// Maps a table's columns and key to the SQL the digest engine runs.
///
/// Built fresh per table per node; every identifier is validated and quoted
/// by the dialect.
#[derive(Debug)]
pub struct DialectBinding<'a> {
    dialect: DialectImpl,
    meta: &'a TableMeta,
}

impl<'a> DialectBinding<'a> {
    pub fn new(dialect: DialectImpl, meta: &'a TableMeta) -> Self {
        Self { dialect, meta }
    }

    pub fn dialect(&self) -> &DialectImpl {
        &self.dialect
    }

    /// Quoted, comma-separated column list in column order.
    pub fn projection(&self) -> Result<String> {
        if self.meta.columns.is_empty() {
            return Err(CheckError::NotFound(format!(
                "no columns for table {}",
                self.meta.table
            )));
        }
        Ok(self
            .meta
            .columns
            .iter()
            .map(|c| self.dialect.quote_ident(&c.name))
            .collect::<Result<Vec<_>>>()?
            .join(", "))
    }

    /// ORDER BY list: primary key, or every column.
    pub fn order_by(&self) -> Result<String> {
        Ok(self
            .meta
            .order_columns()
            .into_iter()
            .map(|c| self.dialect.quote_ident(c))
            .collect::<Result<Vec<_>>>()?
            .join(", "))
    }

    fn qualified_table(&self) -> Result<String> {
        self.dialect
            .qualify(&self.meta.table.schema, &self.meta.table.name)
    }

    /// Ordered row source for a descriptor, with its parameters.
    ///
    /// # Errors
    ///
    /// `UnsupportedKeyShape` for key-range checks on tables without a single
    /// integer primary key. Raised before any SQL is built.
    pub fn select_sql(&self, descriptor: &CheckDescriptor) -> Result<(String, Vec<SqlValue>)> {
        let key = match descriptor.method() {
            CheckMethod::PrimaryKey => Some(self.meta.single_integer_key()?),
            CheckMethod::Position => None,
        };

        let mut sql = format!(
            "SELECT {} FROM {}",
            self.projection()?,
            self.qualified_table()?
        );
        let mut params = Vec::new();

        match (key, descriptor.range()) {
            (Some(key), Some(range)) => {
                let col = self.dialect.quote_ident(&key.name)?;
                sql.push_str(&format!(
                    " WHERE {} >= {} AND {} < {}",
                    col,
                    self.dialect.int_param_placeholder(1),
                    col,
                    self.dialect.int_param_placeholder(2)
                ));
                params.push(SqlValue::I64(range.offset));
                params.push(SqlValue::I64(range.end()));
                sql.push_str(&format!(" ORDER BY {}", self.order_by()?));
            }
            (None, Some(range)) => {
                sql.push_str(&format!(" ORDER BY {}", self.order_by()?));
                sql.push(' ');
                sql.push_str(&self.dialect.window_clause(range.offset, range.limit));
            }
            (_, None) => {
                sql.push_str(&format!(" ORDER BY {}", self.order_by()?));
            }
        }

        Ok((sql, params))
    }

    /// `SELECT MIN(key), MAX(key)` over the single integer key.
    pub fn key_bounds_sql(&self) -> Result<String> {
        let key = self.meta.single_integer_key()?;
        let col = self.dialect.quote_ident(&key.name)?;
        Ok(format!(
            "SELECT MIN({}), MAX({}) FROM {}",
            col,
            col,
            self.qualified_table()?
        ))
    }

    /// `SELECT COUNT(*)` over the table.
    pub fn count_sql(&self) -> Result<String> {
        Ok(format!("SELECT COUNT(*) FROM {}", self.qualified_table()?))
    }
}
