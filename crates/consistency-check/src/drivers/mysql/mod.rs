//! MySQL/MariaDB driver.
//!
//! - [`MysqlDialect`]: SQL syntax strategy
//! - [`MysqlConnection`]: one SQLx session implementing `SqlConnection`
//!
//! # Supported Versions
//!
//! - MySQL 5.7+, 8.0+
//! - MariaDB 10.2+
//!
//! Change-logging suppression uses `sql_log_bin`, which needs the
//! `SUPER` (or `SYSTEM_VARIABLES_ADMIN`) privilege.

mod connection;
mod dialect;

pub use connection::MysqlConnection;
pub use dialect::MysqlDialect;
