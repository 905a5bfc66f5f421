//! PostgreSQL session implementing [`SqlConnection`].
//!
//! The session is checked out of a single-slot deadpool pool and held for the
//! lifetime of the handle, so transaction state stays on one backend.

use std::error::Error as StdError;

use async_trait::async_trait;
use bytes::BytesMut;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::core::traits::SqlConnection;
use crate::core::value::{Row, SqlValue};
use crate::drivers::common::SslMode;
use crate::error::{CheckError, Result};

type PgParam = Box<dyn ToSql + Sync + Send>;

/// A single PostgreSQL session.
pub struct PostgresConnection {
    client: Object,
    _pool: Pool,
    label: String,
}

impl PostgresConnection {
    /// Open a session and pin its time zone to UTC.
    pub async fn connect(config: &NodeConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port());
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = match SslMode::parse(&config.ssl_mode)?.pg_connector()? {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                Manager::from_config(pg_config, NoTls, mgr_config)
            }
        };

        let pool = Pool::builder(mgr)
            .max_size(1)
            .build()
            .map_err(|e| CheckError::dialect("postgres", e))?;

        let client = pool
            .get()
            .await
            .map_err(|e| CheckError::dialect("postgres", e))?;

        client
            .batch_execute("SET TIME ZONE 'UTC'")
            .await
            .map_err(pg_err)?;

        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            config.host,
            config.port(),
            config.database
        );

        Ok(Self {
            client,
            _pool: pool,
            label: config.display_name(),
        })
    }

    async fn batch(&self, sql: &str) -> Result<()> {
        debug!("[{}] {}", self.label, sql);
        self.client.batch_execute(sql).await.map_err(pg_err)
    }
}

#[async_trait]
impl SqlConnection for PostgresConnection {
    fn engine(&self) -> &str {
        "postgres"
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        debug!("[{}] {} ({} params)", self.label, sql, params.len());
        let owned: Vec<PgParam> = params.iter().map(to_pg_param).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = owned
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        let rows = self.client.query(sql, &refs).await.map_err(pg_err)?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        debug!("[{}] {} ({} params)", self.label, sql, params.len());
        let owned: Vec<PgParam> = params.iter().map(to_pg_param).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = owned
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        self.client.execute(sql, &refs).await.map_err(pg_err)
    }

    async fn begin_snapshot(&self) -> Result<()> {
        self.batch("BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .await
    }

    async fn end_snapshot(&self) -> Result<()> {
        self.batch("COMMIT").await
    }

    async fn set_change_logging(&self, enabled: bool) -> Result<()> {
        // Logical replication has no per-session switch comparable to sql_log_bin
        debug!(
            "[{}] change logging {} requested; no-op on PostgreSQL",
            self.label,
            if enabled { "on" } else { "off" }
        );
        Ok(())
    }
}

fn pg_err(e: tokio_postgres::Error) -> CheckError {
    CheckError::dialect("postgres", e)
}

/// NULL parameter accepted for any column type.
#[derive(Debug)]
struct PgNull;

impl ToSql for PgNull {
    fn to_sql(
        &self,
        _ty: &Type,
        _out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn StdError + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn to_pg_param(value: &SqlValue) -> PgParam {
    match value {
        SqlValue::Null => Box::new(PgNull),
        SqlValue::Bool(v) => Box::new(*v),
        SqlValue::I16(v) => Box::new(*v),
        SqlValue::I32(v) => Box::new(*v),
        SqlValue::I64(v) => Box::new(*v),
        SqlValue::F32(v) => Box::new(*v),
        SqlValue::F64(v) => Box::new(*v),
        SqlValue::Text(v) => Box::new(v.clone()),
        SqlValue::Bytes(v) => Box::new(v.clone()),
        SqlValue::Uuid(v) => Box::new(*v),
        SqlValue::Decimal(v) => Box::new(*v),
        SqlValue::DateTime(v) => Box::new(*v),
        SqlValue::DateTimeOffset(v) => Box::new(*v),
        SqlValue::Date(v) => Box::new(*v),
        SqlValue::Time(v) => Box::new(*v),
    }
}

fn decode_row(row: &tokio_postgres::Row) -> Result<Row> {
    (0..row.len()).map(|i| decode_value(row, i)).collect()
}

/// Decode one column by its PostgreSQL type name.
fn decode_value(row: &tokio_postgres::Row, idx: usize) -> Result<SqlValue> {
    let type_name = row.columns()[idx].type_().name().to_string();

    let value = match type_name.as_str() {
        "bool" => row.try_get::<_, Option<bool>>(idx).map(|v| v.map(SqlValue::Bool)),
        "int2" => row.try_get::<_, Option<i16>>(idx).map(|v| v.map(SqlValue::I16)),
        "int4" => row.try_get::<_, Option<i32>>(idx).map(|v| v.map(SqlValue::I32)),
        "int8" => row.try_get::<_, Option<i64>>(idx).map(|v| v.map(SqlValue::I64)),
        "float4" => row.try_get::<_, Option<f32>>(idx).map(|v| v.map(SqlValue::F32)),
        "float8" => row.try_get::<_, Option<f64>>(idx).map(|v| v.map(SqlValue::F64)),
        "numeric" => row
            .try_get::<_, Option<Decimal>>(idx)
            .map(|v| v.map(SqlValue::Decimal)),
        "uuid" => row
            .try_get::<_, Option<uuid::Uuid>>(idx)
            .map(|v| v.map(SqlValue::Uuid)),
        "timestamp" => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .map(|v| v.map(SqlValue::DateTime)),
        "timestamptz" => row
            .try_get::<_, Option<chrono::DateTime<chrono::FixedOffset>>>(idx)
            .map(|v| v.map(SqlValue::DateTimeOffset)),
        "date" => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)
            .map(|v| v.map(SqlValue::Date)),
        "time" => row
            .try_get::<_, Option<chrono::NaiveTime>>(idx)
            .map(|v| v.map(SqlValue::Time)),
        "bytea" => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .map(|v| v.map(SqlValue::Bytes)),
        "json" | "jsonb" => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .map(|v| v.map(|j| SqlValue::Text(j.to_string()))),
        // CHAR(n) comes back blank-padded; MySQL strips the padding
        "bpchar" => row
            .try_get::<_, Option<String>>(idx)
            .map(|v| v.map(|s| SqlValue::Text(s.trim_end_matches(' ').to_string()))),
        _ => row
            .try_get::<_, Option<String>>(idx)
            .map(|v| v.map(SqlValue::Text)),
    };

    value
        .map(|v| v.unwrap_or(SqlValue::Null))
        .map_err(pg_err)
}
