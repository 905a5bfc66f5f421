//! PostgreSQL SQL dialect (Strategy pattern).
//!
//! Provides PostgreSQL-specific SQL syntax for identifier quoting, catalog
//! queries, row windows and upserts.

use crate::core::identifier::{qualify_pg, quote_pg};
use crate::core::traits::Dialect;
use crate::error::Result;

/// PostgreSQL dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Create a new PostgreSQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        quote_pg(name)
    }

    fn qualify(&self, schema: &str, table: &str) -> Result<String> {
        qualify_pg(schema, table)
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn int_param_placeholder(&self, index: usize) -> String {
        // Typed parameter; the key column keeps its own type so its index stays usable
        format!("${}::BIGINT", index)
    }

    fn window_clause(&self, offset: i64, limit: i64) -> String {
        format!("LIMIT {} OFFSET {}", limit, offset)
    }

    fn columns_query(&self) -> String {
        // information_schema columns are domains; cast so they decode as text
        r#"SELECT
                column_name::text,
                data_type::text,
                ordinal_position::int4
            FROM information_schema.columns
            WHERE table_schema = $1::text AND table_name = $2::text
            ORDER BY ordinal_position"#
            .to_string()
    }

    fn primary_key_query(&self) -> String {
        r#"SELECT a.attname::text
            FROM pg_catalog.pg_constraint c
            JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid
            WHERE n.nspname = $1::text
              AND t.relname = $2::text
              AND c.contype = 'p'
              AND a.attnum = ANY(c.conkey)
            ORDER BY array_position(c.conkey, a.attnum)"#
            .to_string()
    }

    fn tables_query(&self) -> String {
        r#"SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = $1::text AND table_type = 'BASE TABLE'
            ORDER BY table_name"#
            .to_string()
    }

    fn build_upsert(
        &self,
        qualified_table: &str,
        columns: &[&str],
        key_columns: &[&str],
        update_columns: &[&str],
    ) -> Result<String> {
        let insert_cols = columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");

        let placeholders = (1..=columns.len())
            .map(|i| self.param_placeholder(i))
            .collect::<Vec<_>>()
            .join(", ");

        let conflict_cols = key_columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");

        let update_set = update_columns
            .iter()
            .map(|c| {
                let q = self.quote_ident(c)?;
                Ok(format!("{} = EXCLUDED.{}", q, q))
            })
            .collect::<Result<Vec<_>>>()?
            .join(", ");

        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
            qualified_table, insert_cols, placeholders, conflict_cols, update_set
        ))
    }

    fn create_schema_sql(&self, schema: &str) -> Result<String> {
        Ok(format!("CREATE SCHEMA IF NOT EXISTS {}", self.quote_ident(schema)?))
    }

    fn result_table_ddl(&self, qualified_table: &str) -> String {
        format!(
            r#"CREATE TABLE IF NOT EXISTS {} (
                db VARCHAR(64) NOT NULL,
                tbl VARCHAR(64) NOT NULL,
                id BIGINT NOT NULL,
                row_offset BIGINT NULL,
                row_limit BIGINT NULL,
                this_crc VARCHAR(40) NULL,
                this_cnt BIGINT NULL,
                master_crc VARCHAR(40) NULL,
                master_cnt BIGINT NULL,
                ts TIMESTAMP(6) NULL,
                method VARCHAR(32) NULL,
                PRIMARY KEY (db, tbl, id)
            )"#,
            qualified_table
        )
    }
}
