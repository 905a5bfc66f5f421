//! # consistency-check
//!
//! Chunked, digest-based consistency checking between a replication source
//! (the reference) and its replicas (the targets).
//!
//! A check computes `(row count, digest)` over an ordered slice of a table on
//! every node and compares the results. This library provides:
//!
//! - **Check descriptors** naming the table slice, method and salting of a check
//! - **A digest engine** that produces identical results on MySQL and PostgreSQL
//! - **A result store** (`<metadata schema>.consistency`) on every node
//! - **A stream annotator** that recognizes result-store writes in a change stream
//! - **A scan orchestrator** that chunks tables and bisects failing chunks
//!
//! ## Example
//!
//! ```rust,no_run
//! use consistency_check::{Config, ScanOrchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> consistency_check::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let scan = ScanOrchestrator::connect(&config, CancellationToken::new()).await?;
//!     scan.init_stores().await?;
//!     let tables = scan.list_tables(&config.check_schema()).await?;
//!     let summary = scan.scan(&tables).await?;
//!     println!("{}: {} inconsistent blocks", summary.status(), summary.inconsistencies);
//!     Ok(())
//! }
//! ```

pub mod annotate;
pub mod check;
pub mod config;
pub mod core;
pub mod digest;
pub mod drivers;
pub mod error;
pub mod remote;
pub mod scan;
pub mod store;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use annotate::{ChangeEvent, CheckApplier, ConsistencyCheckFilter, EventFilter};
pub use check::{CheckDescriptor, CheckMethod, CheckRange, IdAllocator};
pub use config::{CheckConfig, CheckMode, ChunkSize, Config, NodeConfig, StoreConfig};
pub use crate::core::{SqlConnection, SqlValue, TableRef};
pub use digest::{compute_digest, DigestResult};
pub use error::{CheckError, Result};
pub use remote::{LocalReplicator, ReplicatorHandle, TargetEndpoint};
pub use scan::{
    NodeHandle, ScanOptions, ScanOrchestrator, ScanProgressUpdate, ScanStatus, ScanSummary,
    TableScanResult,
};
pub use store::{ResultRow, ResultStore};
