//! Remote management handle of the reference replicator.
//!
//! In replicated mode the orchestrator does not touch the targets' data
//! connections. It asks the reference replicator to issue each check; the
//! check reaches every target through the change stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::annotate::{
    ChangeEvent, ColumnSpec, EventFragment, DESCRIPTOR_METADATA_KEY, TIME_ZONE_KEY, UTC_OFFSET,
};
use crate::check::{CheckDescriptor, CheckMethod, IdAllocator};
use crate::core::schema::TableRef;
use crate::core::traits::SqlConnection;
use crate::core::value::SqlValue;
use crate::digest::{compute_digest, DigestResult};
use crate::error::{CheckError, Result};
use crate::store::{ResultStore, RESULT_TABLE};

/// Address of a replica attached to the reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEndpoint {
    pub host: String,
    pub port: u16,
}

/// Management interface of the reference node's replicator.
#[async_trait]
pub trait ReplicatorHandle: Send + Sync {
    /// Issue a check on the reference and return its id.
    async fn issue_check(
        &self,
        method: CheckMethod,
        schema: &str,
        table: &str,
        offset: Option<i64>,
        limit: Option<i64>,
    ) -> Result<i64>;

    /// Replicas currently attached to the reference.
    async fn list_targets(&self) -> Result<Vec<TargetEndpoint>>;
}

/// Replicator handle backed by a direct connection to the reference.
///
/// Issuing a check computes the reference digest, records it in the
/// reference store and, when a sink is attached, emits the store write as a
/// change event carrying the serialized descriptor. With a sink the store
/// write is kept out of the reference's own change log; the emitted event is
/// its only copy.
pub struct LocalReplicator {
    data: Arc<dyn SqlConnection>,
    store: ResultStore,
    ids: Arc<IdAllocator>,
    check_names: bool,
    check_types: bool,
    targets: Vec<TargetEndpoint>,
    sink: Option<mpsc::Sender<ChangeEvent>>,
    seqno: AtomicU64,
}

impl LocalReplicator {
    pub fn new(data: Arc<dyn SqlConnection>, store: ResultStore, ids: Arc<IdAllocator>) -> Self {
        Self {
            data,
            store,
            ids,
            check_names: true,
            check_types: true,
            targets: Vec::new(),
            sink: None,
            seqno: AtomicU64::new(1),
        }
    }

    pub fn with_salt(mut self, check_names: bool, check_types: bool) -> Self {
        self.check_names = check_names;
        self.check_types = check_types;
        self
    }

    pub fn with_targets(mut self, targets: Vec<TargetEndpoint>) -> Self {
        self.targets = targets;
        self
    }

    /// Emit issued checks into an in-process change stream.
    pub fn with_sink(mut self, sink: mpsc::Sender<ChangeEvent>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sender of the attached change stream.
    ///
    /// Events sent here reach every target before any check issued later.
    pub fn change_stream(&self) -> Option<mpsc::Sender<ChangeEvent>> {
        self.sink.clone()
    }

    /// Record the reference digest with change logging suppressed.
    async fn record_unlogged(&self, descriptor: &CheckDescriptor, result: &DigestResult) -> Result<()> {
        let control = self.store.connection();
        control.set_change_logging(false).await?;
        let recorded = self.store.record_local(descriptor, result).await;
        if let Err(e) = control.set_change_logging(true).await {
            warn!("Failed to restore change logging after {}: {}", descriptor, e);
        }
        recorded
    }

    fn check_event(&self, descriptor: &CheckDescriptor, count: i64, digest: &str) -> Result<ChangeEvent> {
        let columns = [
            ("db", "char"),
            ("tbl", "char"),
            ("id", "bigint"),
            ("row_offset", "bigint"),
            ("row_limit", "bigint"),
            ("this_crc", "char"),
            ("this_cnt", "bigint"),
            ("method", "char"),
        ]
        .iter()
        .map(|(name, ty)| ColumnSpec::new(*name, *ty))
        .collect();

        let range = descriptor.range();
        let row = vec![
            SqlValue::from(descriptor.schema()),
            SqlValue::from(descriptor.table_name()),
            SqlValue::I64(descriptor.id()),
            range.map(|r| SqlValue::I64(r.offset)).unwrap_or(SqlValue::Null),
            range.map(|r| SqlValue::I64(r.limit)).unwrap_or(SqlValue::Null),
            SqlValue::from(digest),
            SqlValue::I64(count),
            SqlValue::from(descriptor.method().as_str()),
        ];

        let wire = String::from_utf8(descriptor.to_bytes()?)
            .map_err(|e| CheckError::MalformedDescriptor(e.to_string()))?;

        Ok(ChangeEvent::new(
            self.seqno.fetch_add(1, Ordering::SeqCst),
            vec![EventFragment::insert(
                self.store.metadata_schema(),
                RESULT_TABLE,
                columns,
                row,
            )],
        )
        .with_metadata(DESCRIPTOR_METADATA_KEY, wire)
        .with_metadata(TIME_ZONE_KEY, UTC_OFFSET))
    }
}

#[async_trait]
impl ReplicatorHandle for LocalReplicator {
    async fn issue_check(
        &self,
        method: CheckMethod,
        schema: &str,
        table: &str,
        offset: Option<i64>,
        limit: Option<i64>,
    ) -> Result<i64> {
        if let Some(max) = self.store.max_id(schema, table).await? {
            self.ids.observe(max);
        }
        let id = self.ids.next_id();
        let descriptor = CheckDescriptor::create(
            id,
            TableRef::new(schema, table),
            offset,
            limit,
            method.as_str(),
            self.check_names,
            self.check_types,
        )?;

        let result = compute_digest(&descriptor, self.data.as_ref()).await?;
        let Some(sink) = &self.sink else {
            self.store.record_local(&descriptor, &result).await?;
            debug!("Issued {}: {} rows on the reference", descriptor, result.count);
            return Ok(id);
        };

        self.record_unlogged(&descriptor, &result).await?;
        debug!("Issued {}: {} rows on the reference", descriptor, result.count);
        let event = self.check_event(&descriptor, result.count, &result.digest)?;
        if sink.send(event).await.is_err() {
            warn!("Change stream closed; {} will not reach the targets", descriptor);
        }
        Ok(id)
    }

    async fn list_targets(&self) -> Result<Vec<TargetEndpoint>> {
        Ok(self.targets.clone())
    }
}
