//! Database driver implementations.
//!
//! - [`mysql`]: MySQL/MariaDB driver
//! - [`postgres`]: PostgreSQL driver
//! - [`common`]: Shared utilities (TLS)
//!
//! Each driver provides a `Dialect` strategy and a session type implementing
//! `SqlConnection`. [`DialectImpl`] dispatches to the strategies statically;
//! [`connect`] opens a session for a configured node.

pub mod common;
pub mod mysql;
pub mod postgres;

pub use common::SslMode;
pub use mysql::{MysqlConnection, MysqlDialect};
pub use postgres::{PostgresConnection, PostgresDialect};

use std::sync::Arc;

use crate::config::NodeConfig;
use crate::core::traits::{Dialect, SqlConnection};
use crate::error::{CheckError, Result};

/// Enum-based static dispatch for dialects.
///
/// Note: We use a manual impl instead of the enum_dispatch macro. The
/// compiler generates a match statement instead of vtable dispatch.
#[derive(Debug, Clone)]
pub enum DialectImpl {
    Mysql(MysqlDialect),
    Postgres(PostgresDialect),
}

impl DialectImpl {
    /// Create a dialect implementation from a database type string.
    ///
    /// # Errors
    ///
    /// `UnsupportedDialect` if the database type is not recognized.
    pub fn from_db_type(db_type: &str) -> Result<Self> {
        match db_type.to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(DialectImpl::Mysql(MysqlDialect::new())),
            "postgres" | "postgresql" | "pg" => Ok(DialectImpl::Postgres(PostgresDialect::new())),
            _ => Err(CheckError::UnsupportedDialect(db_type.to_string())),
        }
    }

    /// Dialect for the engine a connection declares.
    pub fn for_connection(conn: &dyn SqlConnection) -> Result<Self> {
        Self::from_db_type(conn.engine())
    }
}

macro_rules! dispatch {
    ($self:ident, $d:ident => $e:expr) => {
        match $self {
            DialectImpl::Mysql($d) => $e,
            DialectImpl::Postgres($d) => $e,
        }
    };
}

impl Dialect for DialectImpl {
    fn name(&self) -> &str {
        dispatch!(self, d => d.name())
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        dispatch!(self, d => d.quote_ident(name))
    }

    fn qualify(&self, schema: &str, table: &str) -> Result<String> {
        dispatch!(self, d => d.qualify(schema, table))
    }

    fn param_placeholder(&self, index: usize) -> String {
        dispatch!(self, d => d.param_placeholder(index))
    }

    fn int_param_placeholder(&self, index: usize) -> String {
        dispatch!(self, d => d.int_param_placeholder(index))
    }

    fn window_clause(&self, offset: i64, limit: i64) -> String {
        dispatch!(self, d => d.window_clause(offset, limit))
    }

    fn columns_query(&self) -> String {
        dispatch!(self, d => d.columns_query())
    }

    fn primary_key_query(&self) -> String {
        dispatch!(self, d => d.primary_key_query())
    }

    fn tables_query(&self) -> String {
        dispatch!(self, d => d.tables_query())
    }

    fn build_upsert(
        &self,
        qualified_table: &str,
        columns: &[&str],
        key_columns: &[&str],
        update_columns: &[&str],
    ) -> Result<String> {
        dispatch!(self, d => d.build_upsert(qualified_table, columns, key_columns, update_columns))
    }

    fn create_schema_sql(&self, schema: &str) -> Result<String> {
        dispatch!(self, d => d.create_schema_sql(schema))
    }

    fn result_table_ddl(&self, qualified_table: &str) -> String {
        dispatch!(self, d => d.result_table_ddl(qualified_table))
    }
}

/// Open a session to a configured node.
pub async fn connect(node: &NodeConfig) -> Result<Arc<dyn SqlConnection>> {
    match DialectImpl::from_db_type(&node.r#type)? {
        DialectImpl::Mysql(_) => Ok(Arc::new(MysqlConnection::connect(node).await?)),
        DialectImpl::Postgres(_) => Ok(Arc::new(PostgresConnection::connect(node).await?)),
    }
}
