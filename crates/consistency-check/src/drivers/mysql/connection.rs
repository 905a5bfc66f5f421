//! MySQL/MariaDB session implementing [`SqlConnection`].
//!
//! Uses one SQLx connection (not a pool) so that the snapshot and
//! `sql_log_bin` state set on the session apply to every later statement.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, ConnectOptions, Executor as _, Row as _, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::NodeConfig;
use crate::core::traits::SqlConnection;
use crate::core::value::{Row, SqlValue};
use crate::drivers::common::SslMode;
use crate::error::{CheckError, Result};

/// A single MySQL session.
pub struct MysqlConnection {
    conn: Mutex<sqlx::MySqlConnection>,
    label: String,
}

impl MysqlConnection {
    /// Open a session and pin its time zone to UTC.
    pub async fn connect(config: &NodeConfig) -> Result<Self> {
        let ssl_mode = SslMode::parse(&config.ssl_mode)?;

        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port())
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .ssl_mode(ssl_mode.mysql());

        let mut conn = options.connect().await.map_err(mysql_err)?;

        // TIMESTAMP columns are rendered in the session zone
        sqlx::raw_sql("SET time_zone = '+00:00'")
            .execute(&mut conn)
            .await
            .map_err(mysql_err)?;

        info!(
            "Connected to MySQL: {}:{}/{}",
            config.host,
            config.port(),
            config.database
        );

        Ok(Self {
            conn: Mutex::new(conn),
            label: config.display_name(),
        })
    }

    async fn raw(&self, sql: &str) -> Result<()> {
        debug!("[{}] {}", self.label, sql);
        let mut conn = self.conn.lock().await;
        (&mut *conn)
            .execute(sqlx::raw_sql(sql))
            .await
            .map_err(mysql_err)?;
        Ok(())
    }
}

#[async_trait]
impl SqlConnection for MysqlConnection {
    fn engine(&self) -> &str {
        "mysql"
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        debug!("[{}] {} ({} params)", self.label, sql, params.len());
        let query = params.iter().fold(sqlx::query(sql), bind_value);
        let mut conn = self.conn.lock().await;
        let rows = query.fetch_all(&mut *conn).await.map_err(mysql_err)?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        debug!("[{}] {} ({} params)", self.label, sql, params.len());
        let query = params.iter().fold(sqlx::query(sql), bind_value);
        let mut conn = self.conn.lock().await;
        let result = query.execute(&mut *conn).await.map_err(mysql_err)?;
        Ok(result.rows_affected())
    }

    async fn begin_snapshot(&self) -> Result<()> {
        self.raw("SET SESSION TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .await?;
        self.raw("START TRANSACTION WITH CONSISTENT SNAPSHOT").await
    }

    async fn end_snapshot(&self) -> Result<()> {
        self.raw("COMMIT").await
    }

    async fn set_change_logging(&self, enabled: bool) -> Result<()> {
        let flag = if enabled { 1 } else { 0 };
        self.raw(&format!("SET SESSION sql_log_bin = {}", flag)).await
    }
}

fn mysql_err(e: sqlx::Error) -> CheckError {
    CheckError::dialect("mysql", e)
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &'q SqlValue,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::I16(v) => query.bind(*v),
        SqlValue::I32(v) => query.bind(*v),
        SqlValue::I64(v) => query.bind(*v),
        SqlValue::F32(v) => query.bind(*v),
        SqlValue::F64(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
        SqlValue::Uuid(v) => query.bind(v.hyphenated().to_string()),
        SqlValue::Decimal(v) => query.bind(*v),
        SqlValue::DateTime(v) => query.bind(*v),
        SqlValue::DateTimeOffset(v) => query.bind(v.with_timezone(&Utc)),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::Time(v) => query.bind(*v),
    }
}

fn decode_row(row: &MySqlRow) -> Result<Row> {
    (0..row.columns().len())
        .map(|i| decode_value(row, i))
        .collect()
}

/// Decode one column by its reported MySQL type.
fn decode_value(row: &MySqlRow, i: usize) -> Result<SqlValue> {
    let is_null = row.try_get_raw(i).map(|r| r.is_null()).map_err(mysql_err)?;
    if is_null {
        return Ok(SqlValue::Null);
    }

    let type_name = row.column(i).type_info().name().to_uppercase();
    let value = match type_name.as_str() {
        // BOOLEAN is TINYINT(1), which stores any value in -128..=127
        "BOOLEAN" | "TINYINT" => tiny_value(row.try_get::<i8, _>(i).map_err(mysql_err)?),
        "TINYINT UNSIGNED" => {
            SqlValue::I16(i16::from(row.try_get::<u8, _>(i).map_err(mysql_err)?))
        }
        "SMALLINT" => SqlValue::I16(row.try_get::<i16, _>(i).map_err(mysql_err)?),
        "SMALLINT UNSIGNED" => {
            SqlValue::I32(i32::from(row.try_get::<u16, _>(i).map_err(mysql_err)?))
        }
        "MEDIUMINT" | "INT" => SqlValue::I32(row.try_get::<i32, _>(i).map_err(mysql_err)?),
        "MEDIUMINT UNSIGNED" | "INT UNSIGNED" => {
            SqlValue::I64(i64::from(row.try_get::<u32, _>(i).map_err(mysql_err)?))
        }
        "BIGINT" => SqlValue::I64(row.try_get::<i64, _>(i).map_err(mysql_err)?),
        "BIGINT UNSIGNED" => {
            let v = row.try_get::<u64, _>(i).map_err(mysql_err)?;
            match i64::try_from(v) {
                Ok(v) => SqlValue::I64(v),
                Err(_) => SqlValue::Decimal(Decimal::from(v)),
            }
        }
        "YEAR" => SqlValue::I32(i32::from(row.try_get::<u16, _>(i).map_err(mysql_err)?)),
        "BIT" => {
            let v = row.try_get::<u64, _>(i).map_err(mysql_err)?;
            SqlValue::I64(v as i64)
        }
        "FLOAT" => SqlValue::F32(row.try_get::<f32, _>(i).map_err(mysql_err)?),
        "DOUBLE" => SqlValue::F64(row.try_get::<f64, _>(i).map_err(mysql_err)?),
        "DECIMAL" => SqlValue::Decimal(row.try_get::<Decimal, _>(i).map_err(mysql_err)?),
        "DATE" => SqlValue::Date(row.try_get::<chrono::NaiveDate, _>(i).map_err(mysql_err)?),
        "TIME" => SqlValue::Time(row.try_get::<chrono::NaiveTime, _>(i).map_err(mysql_err)?),
        "DATETIME" | "TIMESTAMP" => {
            SqlValue::DateTime(row.try_get::<chrono::NaiveDateTime, _>(i).map_err(mysql_err)?)
        }
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB"
        | "GEOMETRY" => SqlValue::Bytes(row.try_get::<Vec<u8>, _>(i).map_err(mysql_err)?),
        _ => SqlValue::Text(row.try_get::<String, _>(i).map_err(mysql_err)?),
    };
    Ok(value)
}

fn tiny_value(v: i8) -> SqlValue {
    SqlValue::I16(i16::from(v))
}
