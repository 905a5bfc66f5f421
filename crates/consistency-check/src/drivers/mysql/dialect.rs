//! MySQL/MariaDB SQL dialect (Strategy pattern).
//!
//! Provides MySQL-specific SQL syntax for identifier quoting, catalog queries,
//! row windows and upserts.

use crate::core::identifier::{qualify_mysql, quote_mysql};
use crate::core::traits::Dialect;
use crate::error::Result;

/// MySQL/MariaDB dialect implementation.
///
/// Compatible with MySQL 5.7+, 8.0+, and MariaDB 10.2+.
#[derive(Debug, Clone, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    /// Create a new MySQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MysqlDialect {
    fn name(&self) -> &str {
        "mysql"
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        quote_mysql(name)
    }

    fn qualify(&self, schema: &str, table: &str) -> Result<String> {
        qualify_mysql(schema, table)
    }

    fn param_placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn int_param_placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn window_clause(&self, offset: i64, limit: i64) -> String {
        format!("LIMIT {}, {}", offset, limit)
    }

    fn columns_query(&self) -> String {
        // CAST to CHAR: MySQL 8 reports some information_schema columns as binary
        r#"SELECT
                CAST(COLUMN_NAME AS CHAR(255)) AS column_name,
                CAST(DATA_TYPE AS CHAR(255)) AS data_type,
                CAST(ORDINAL_POSITION AS SIGNED) AS ordinal_position
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION"#
            .to_string()
    }

    fn primary_key_query(&self) -> String {
        r#"SELECT CAST(COLUMN_NAME AS CHAR(255)) AS column_name
            FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY'
            ORDER BY ORDINAL_POSITION"#
            .to_string()
    }

    fn tables_query(&self) -> String {
        r#"SELECT CAST(TABLE_NAME AS CHAR(255)) AS table_name
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME"#
            .to_string()
    }

    fn build_upsert(
        &self,
        qualified_table: &str,
        columns: &[&str],
        _key_columns: &[&str],
        update_columns: &[&str],
    ) -> Result<String> {
        // Relies on the PRIMARY KEY of the target table
        let insert_cols = columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");

        let placeholders = vec!["?"; columns.len()].join(", ");

        let update_set = update_columns
            .iter()
            .map(|c| {
                let q = self.quote_ident(c)?;
                Ok(format!("{} = VALUES({})", q, q))
            })
            .collect::<Result<Vec<_>>>()?
            .join(", ");

        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
            qualified_table, insert_cols, placeholders, update_set
        ))
    }

    fn create_schema_sql(&self, schema: &str) -> Result<String> {
        Ok(format!("CREATE DATABASE IF NOT EXISTS {}", self.quote_ident(schema)?))
    }

    fn result_table_ddl(&self, qualified_table: &str) -> String {
        format!(
            r#"CREATE TABLE IF NOT EXISTS {} (
                db CHAR(64) NOT NULL,
                tbl CHAR(64) NOT NULL,
                id BIGINT NOT NULL,
                row_offset BIGINT NULL,
                row_limit BIGINT NULL,
                this_crc CHAR(40) NULL,
                this_cnt BIGINT NULL,
                master_crc CHAR(40) NULL,
                master_cnt BIGINT NULL,
                ts DATETIME(6) NULL,
                method CHAR(32) NULL,
                PRIMARY KEY (db, tbl, id)
            ) ENGINE=InnoDB"#,
            qualified_table
        )
    }
}
