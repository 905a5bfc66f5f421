//! Scan orchestrator.
//!
//! Walks a table in power-of-two chunks, issues one check per chunk and, when
//! a target disagrees with the reference, bisects the failing chunk until the
//! divergent block is no larger than the configured granularity:
//!
//! - **Range**: explicit bounds win; otherwise the key bounds (pk) or the row
//!   count (position) measured on the reference
//! - **Direct mode**: digests computed here on every node, results written to
//!   every store with change logging suppressed
//! - **Replicated mode**: checks issued through the reference replicator and
//!   awaited in each target's store
//!
//! Only timeouts and cancellation stop a scan; every other failure is
//! recorded against the chunk and the scan moves on.

mod types;

pub use types::{
    CheckFailure, Inconsistency, ScanOptions, ScanProgressUpdate, ScanStatus, ScanSummary,
    TableScanResult,
};

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::annotate::{ChangeEvent, CheckApplier, ConsistencyCheckFilter};
use crate::check::{CheckDescriptor, CheckMethod, CheckRange, Chunk, ChunkPlan, IdAllocator};
use crate::config::{CheckMode, Config, NodeConfig};
use crate::core::schema::{TableMeta, TableRef};
use crate::core::traits::SqlConnection;
use crate::digest::{
    compute_with_meta, compute_within_snapshot, fetch_rows, key_bounds, list_tables,
    load_table_meta, row_count, DigestResult,
};
use crate::drivers;
use crate::error::{CheckError, Result};
use crate::remote::{LocalReplicator, ReplicatorHandle, TargetEndpoint};
use crate::store::{ResultRow, ResultStore};

/// The two sessions the orchestrator holds on one node.
///
/// The data session computes digests; the control session carries result
/// store traffic and the change-logging switch.
#[derive(Clone)]
pub struct NodeHandle {
    name: String,
    data: Arc<dyn SqlConnection>,
    store: ResultStore,
}

impl NodeHandle {
    pub fn new(
        name: impl Into<String>,
        data: Arc<dyn SqlConnection>,
        control: Arc<dyn SqlConnection>,
        metadata_schema: &str,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            data,
            store: ResultStore::new(control, metadata_schema)?,
        })
    }

    /// Open the data and control sessions for a configured node.
    pub async fn connect(config: &NodeConfig, metadata_schema: &str) -> Result<Self> {
        let data = drivers::connect(config).await?;
        let control = drivers::connect(config).await?;
        Self::new(config.display_name(), data, control, metadata_schema)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &Arc<dyn SqlConnection> {
        &self.data
    }

    pub fn control(&self) -> &Arc<dyn SqlConnection> {
        self.store.connection()
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    async fn close(&self) {
        self.data.close().await;
        self.store.connection().close().await;
    }
}

/// Per-table state shared by every check of one table scan.
struct TableContext {
    table: TableRef,
    reference: TableMeta,
    targets: Vec<TableMeta>,
}

/// Per-target results of one issued check.
type CheckOutcome = (i64, Vec<Result<ResultRow>>);

/// Consistency scan coordinator.
pub struct ScanOrchestrator {
    reference: NodeHandle,
    targets: Vec<NodeHandle>,
    options: ScanOptions,
    replicator: Option<Arc<dyn ReplicatorHandle>>,
    ids: Arc<IdAllocator>,
    progress_tx: Option<mpsc::Sender<ScanProgressUpdate>>,
    cancel: CancellationToken,
}

impl ScanOrchestrator {
    /// Create an orchestrator over already-open nodes.
    pub fn new(reference: NodeHandle, targets: Vec<NodeHandle>, options: ScanOptions) -> Self {
        Self {
            reference,
            targets,
            options,
            replicator: None,
            ids: Arc::new(IdAllocator::default()),
            progress_tx: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Connect every configured node.
    ///
    /// In replicated mode the reference replicator is a [`LocalReplicator`]
    /// whose change stream is applied on each target by a [`CheckApplier`]
    /// task. Only changes relayed through [`LocalReplicator::change_stream`]
    /// are ordered before a check.
    pub async fn connect(config: &Config, cancel: CancellationToken) -> Result<Self> {
        let schema = &config.store.metadata_schema;
        let options = ScanOptions::from_config(&config.check)?;
        let reference = NodeHandle::connect(&config.reference, schema).await?;
        let mut targets = Vec::with_capacity(config.targets.len());
        for target in &config.targets {
            targets.push(NodeHandle::connect(target, schema).await?);
        }
        info!(
            "Connected to reference {} and {} target(s)",
            reference.name(),
            targets.len()
        );

        let mut orchestrator = Self::new(reference, targets, options).with_cancellation(cancel);
        if orchestrator.options.mode == CheckMode::Replicated {
            let endpoints = config
                .targets
                .iter()
                .map(|t| TargetEndpoint {
                    host: t.host.clone(),
                    port: t.port(),
                })
                .collect();
            warn!(
                "Replicated mode without an external replicator: checks reach the targets through \
                 an in-process stream that is not ordered behind native replication, so tables \
                 must be quiet during the scan"
            );
            let replicator = orchestrator.loopback_replicator(schema, endpoints)?;
            orchestrator = orchestrator.with_replicator(Arc::new(replicator));
        }
        Ok(orchestrator)
    }

    /// Wire a [`LocalReplicator`] to in-process appliers on every target.
    fn loopback_replicator(
        &self,
        metadata_schema: &str,
        endpoints: Vec<TargetEndpoint>,
    ) -> Result<LocalReplicator> {
        let (tx, mut rx) = mpsc::channel::<ChangeEvent>(64);

        let mut lanes = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            let (lane_tx, lane_rx) = mpsc::channel(64);
            let filter = ConsistencyCheckFilter::new(metadata_schema)?
                .with_salt_defaults(self.options.check_names, self.options.check_types);
            let applier = CheckApplier::new(target.data.clone(), target.store.clone());
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = applier.run(filter, lane_rx, cancel).await {
                    warn!("Check applier stopped: {}", e);
                }
            });
            lanes.push(lane_tx);
        }

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                for lane in &lanes {
                    if lane.send(event.clone()).await.is_err() {
                        debug!("Applier lane closed; dropping event {}", event.seqno);
                    }
                }
            }
        });

        Ok(LocalReplicator::new(
            self.reference.data.clone(),
            self.reference.store.clone(),
            self.ids.clone(),
        )
        .with_salt(self.options.check_names, self.options.check_types)
        .with_targets(endpoints)
        .with_sink(tx))
    }

    /// Issue checks through a replicator instead of computing them here.
    pub fn with_replicator(mut self, replicator: Arc<dyn ReplicatorHandle>) -> Self {
        self.replicator = Some(replicator);
        self.options.mode = CheckMode::Replicated;
        self
    }

    /// Share an id allocator (e.g. with a [`LocalReplicator`]).
    pub fn with_ids(mut self, ids: Arc<IdAllocator>) -> Self {
        self.ids = ids;
        self
    }

    /// Set progress channel for updates.
    pub fn with_progress(mut self, tx: mpsc::Sender<ScanProgressUpdate>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    pub fn reference(&self) -> &NodeHandle {
        &self.reference
    }

    pub fn targets(&self) -> &[NodeHandle] {
        &self.targets
    }

    /// Send progress update if channel is configured.
    async fn send_progress(&self, update: ScanProgressUpdate) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(update).await;
        }
    }

    fn nodes(&self) -> impl Iterator<Item = &NodeHandle> {
        std::iter::once(&self.reference).chain(self.targets.iter())
    }

    /// Create the result store on every node.
    pub async fn init_stores(&self) -> Result<()> {
        for node in self.nodes() {
            node.store.init_schema().await?;
        }
        Ok(())
    }

    /// Delete store rows older than `days` on every node.
    pub async fn purge_results(&self, days: u32) -> Result<u64> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(days));
        let mut removed = 0;
        for node in self.nodes() {
            removed += node.store.purge_older_than(cutoff).await?;
        }
        Ok(removed)
    }

    /// Base tables of `schema` on the reference.
    pub async fn list_tables(&self, schema: &str) -> Result<Vec<TableRef>> {
        Ok(list_tables(self.reference.data.as_ref(), schema)
            .await?
            .into_iter()
            .map(|name| TableRef::new(schema, name))
            .collect())
    }

    /// Close every session.
    pub async fn close(&self) {
        for node in self.nodes() {
            node.close().await;
        }
    }

    /// Scan several tables.
    ///
    /// A table whose range cannot be determined is reported as failed and
    /// the scan continues; timeouts and cancellation abort everything.
    pub async fn scan(&self, tables: &[TableRef]) -> Result<ScanSummary> {
        let start = Instant::now();
        let mut summary = ScanSummary::new();

        info!(
            "Scanning {} table(s) in {} mode against {} target(s)",
            tables.len(),
            self.options.mode,
            self.targets.len()
        );

        for table in tables {
            if self.cancel.is_cancelled() {
                return Err(CheckError::Cancelled);
            }
            match self.scan_table(table).await {
                Ok(result) => summary.add_table(result),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("{}: scan aborted: {}", table, e);
                    let mut result =
                        TableScanResult::new(table.full_name(), self.options.mode, self.options.method);
                    result.error = Some(e.to_string());
                    summary.add_table(result);
                }
            }
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Scan {}: {} tables ({} consistent, {} inconsistent, {} failed), {} checks",
            summary.status(),
            summary.tables_checked,
            summary.tables_consistent,
            summary.tables_inconsistent,
            summary.tables_failed,
            summary.checks_issued
        );
        Ok(summary)
    }

    /// Scan one table.
    ///
    /// # Errors
    ///
    /// Range determination errors, `CheckTimeout` and `Cancelled`.
    pub async fn scan_table(&self, table: &TableRef) -> Result<TableScanResult> {
        let start = Instant::now();
        let mut result =
            TableScanResult::new(table.full_name(), self.options.mode, self.options.method);
        if self.options.mode == CheckMode::Replicated && self.replicator.is_none() {
            return Err(CheckError::Config(
                "replicated mode requires a replicator handle".into(),
            ));
        }

        let ctx = self.table_context(table).await?;
        let (row_from, row_till) = self.determine_range(&ctx).await?;
        let plan = ChunkPlan::new(row_from, row_till, self.options.chunk_size);
        let chunks: Vec<Chunk> = plan.clone().collect();

        result.row_from = row_from;
        result.row_till = row_till;
        result.chunk_size = plan.chunk_size();

        if self.replicator.is_none() {
            self.seed_ids(table).await?;
        }

        info!(
            "{}: checking [{}, {}) in {} chunk(s) of {} by {}",
            table,
            row_from,
            row_till,
            chunks.len(),
            plan.chunk_size(),
            self.options.method
        );

        let all_targets: Vec<usize> = (0..self.targets.len()).collect();
        for (n, chunk) in chunks.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!("Cancellation requested, stopping scan of {}", table);
                return Err(CheckError::Cancelled);
            }
            if n > 0 && !self.options.chunk_pause.is_zero() {
                self.pause().await?;
            }

            result.checks_issued += 1;
            match self.issue(&ctx, *chunk, &all_targets).await {
                Ok((id, outcomes)) => {
                    for (&target, outcome) in all_targets.iter().zip(outcomes) {
                        match outcome {
                            Ok(row) if row.passed() => {}
                            Ok(row) => {
                                self.drill_down(&ctx, target, *chunk, id, row, &mut result)
                                    .await?
                            }
                            Err(e) if e.is_fatal() => return Err(e),
                            Err(e) => self.record_failure(&mut result, Some(target), *chunk, e),
                        }
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => self.record_failure(&mut result, None, *chunk, e),
            }
            result.chunks_checked += 1;

            self.send_progress(ScanProgressUpdate {
                table: table.full_name(),
                chunks_total: chunks.len(),
                chunks_completed: n + 1,
                checks_issued: result.checks_issued,
                inconsistencies_found: result.inconsistencies.len(),
            })
            .await;
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        if result.is_consistent() {
            info!(
                "{}: consistent ({} chunks, {} checks)",
                table, result.chunks_checked, result.checks_issued
            );
        } else {
            warn!(
                "{}: {} ({} inconsistent blocks, {} failed checks)",
                table,
                result.status(),
                result.inconsistencies.len(),
                result.failures.len()
            );
        }
        Ok(result)
    }

    async fn table_context(&self, table: &TableRef) -> Result<TableContext> {
        let reference = load_table_meta(self.reference.data.as_ref(), table).await?;
        let mut targets = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            targets.push(load_table_meta(target.data.as_ref(), table).await?);
        }
        Ok(TableContext {
            table: table.clone(),
            reference,
            targets,
        })
    }

    /// Row universe `[from, till)` measured on the reference.
    async fn determine_range(&self, ctx: &TableContext) -> Result<(i64, i64)> {
        let conn = self.reference.data.as_ref();
        let (from, till) = match (self.options.row_from, self.options.row_till) {
            (Some(from), Some(till)) => (from, till),
            (from, till) => match self.options.method {
                CheckMethod::PrimaryKey => {
                    let bounds = key_bounds(&ctx.reference, conn).await?;
                    let (min, max) = bounds.unwrap_or((0, -1));
                    (from.unwrap_or(min), till.unwrap_or(max.saturating_add(1)))
                }
                CheckMethod::Position => {
                    let till = match till {
                        Some(till) => till,
                        None => row_count(&ctx.reference, conn).await?,
                    };
                    (from.unwrap_or(0), till)
                }
            },
        };
        if from > till {
            return Err(CheckError::Config(format!(
                "{}: row range [{}, {}) is empty",
                ctx.table, from, till
            )));
        }
        Ok((from, till))
    }

    /// Move the allocator above every id any store has seen for the table.
    async fn seed_ids(&self, table: &TableRef) -> Result<()> {
        for node in self.nodes() {
            if let Some(max) = node.store.max_id(&table.schema, &table.name).await? {
                self.ids.observe(max);
            }
        }
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(CheckError::Cancelled),
            _ = tokio::time::sleep(self.options.chunk_pause) => Ok(()),
        }
    }

    /// Issue one check for `chunk` and collect the results of `targets`.
    async fn issue(&self, ctx: &TableContext, chunk: Chunk, targets: &[usize]) -> Result<CheckOutcome> {
        match &self.replicator {
            Some(replicator) => self.issue_replicated(replicator.as_ref(), ctx, chunk, targets).await,
            None => {
                let descriptor = CheckDescriptor::new(
                    self.ids.next_id(),
                    ctx.table.clone(),
                    Some(CheckRange {
                        offset: chunk.start,
                        limit: chunk.size,
                    }),
                    self.options.method,
                    self.options.check_names,
                    self.options.check_types,
                );
                let outcomes = self.issue_direct(ctx, &descriptor, targets).await?;
                Ok((descriptor.id(), outcomes))
            }
        }
    }

    async fn issue_replicated(
        &self,
        replicator: &dyn ReplicatorHandle,
        ctx: &TableContext,
        chunk: Chunk,
        targets: &[usize],
    ) -> Result<CheckOutcome> {
        let id = replicator
            .issue_check(
                self.options.method,
                &ctx.table.schema,
                &ctx.table.name,
                Some(chunk.start),
                Some(chunk.size),
            )
            .await?;
        debug!("{}#{}: issued through replicator for [{}, {})", ctx.table, id, chunk.start, chunk.end());

        let mut outcomes = Vec::with_capacity(targets.len());
        for &i in targets {
            match self.await_result(&self.targets[i], &ctx.table, id).await {
                Err(e) if e.is_fatal() => return Err(e),
                outcome => outcomes.push(outcome),
            }
        }
        Ok((id, outcomes))
    }

    /// Poll a target's store until the check resolves.
    ///
    /// # Errors
    ///
    /// `CheckTimeout` once the configured timeout elapses.
    async fn await_result(&self, node: &NodeHandle, table: &TableRef, id: i64) -> Result<ResultRow> {
        let deadline = tokio::time::Instant::now() + self.options.timeout;
        loop {
            match node.store.fetch(&table.schema, &table.name, id).await {
                Ok(row) if row.is_resolved() => return Ok(row),
                Ok(_) | Err(CheckError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CheckError::CheckTimeout {
                    table: table.full_name(),
                    id,
                    node: node.name.clone(),
                    timeout: self.options.timeout,
                });
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(CheckError::Cancelled),
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }
        }
    }

    /// Run a check on the reference and `targets` with change logging off.
    ///
    /// Logging is restored on every control session that was switched,
    /// whatever the outcome.
    async fn issue_direct(
        &self,
        ctx: &TableContext,
        descriptor: &CheckDescriptor,
        targets: &[usize],
    ) -> Result<Vec<Result<ResultRow>>> {
        let nodes: Vec<&NodeHandle> = std::iter::once(&self.reference)
            .chain(targets.iter().map(|&i| &self.targets[i]))
            .collect();

        let mut suppressed = Vec::with_capacity(nodes.len());
        let mut outcome = Ok(Vec::new());
        for node in nodes {
            match node.control().set_change_logging(false).await {
                Ok(()) => suppressed.push(node),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        if outcome.is_ok() {
            outcome = self.compare_direct(ctx, descriptor, targets).await;
        }

        for node in suppressed {
            if let Err(e) = node.control().set_change_logging(true).await {
                warn!("Failed to restore change logging on {}: {}", node.name, e);
            }
        }
        outcome
    }

    async fn compare_direct(
        &self,
        ctx: &TableContext,
        descriptor: &CheckDescriptor,
        targets: &[usize],
    ) -> Result<Vec<Result<ResultRow>>> {
        let reference = async {
            let conn = self.reference.data.as_ref();
            conn.begin_snapshot().await?;
            let result = compute_within_snapshot(descriptor, &ctx.reference, conn).await;
            if let Err(e) = conn.end_snapshot().await {
                warn!("Failed to release snapshot on {}: {}", self.reference.name, e);
            }
            result
        };
        let target_digests = join_all(targets.iter().map(|&i| {
            compute_with_meta(descriptor, &ctx.targets[i], self.targets[i].data.as_ref())
        }));
        let (reference, target_digests) = tokio::join!(reference, target_digests);

        let reference = reference?;
        self.reference.store.record_local(descriptor, &reference).await?;

        let mut outcomes = Vec::with_capacity(targets.len());
        for (&i, digest) in targets.iter().zip(target_digests) {
            outcomes.push(
                self.record_target(&self.targets[i], descriptor, &reference, digest)
                    .await,
            );
        }
        Ok(outcomes)
    }

    async fn record_target(
        &self,
        node: &NodeHandle,
        descriptor: &CheckDescriptor,
        reference: &DigestResult,
        digest: Result<DigestResult>,
    ) -> Result<ResultRow> {
        let local = digest?;
        node.store.record_local(descriptor, &local).await?;
        node.store.record_reference(descriptor, reference).await?;
        node.store
            .fetch(descriptor.schema(), descriptor.table_name(), descriptor.id())
            .await
    }

    /// Bisect a failing chunk on one target down to the granularity.
    async fn drill_down(
        &self,
        ctx: &TableContext,
        target: usize,
        chunk: Chunk,
        id: i64,
        row: ResultRow,
        result: &mut TableScanResult,
    ) -> Result<()> {
        if chunk.size <= self.options.granularity {
            self.report(ctx, target, chunk, id, &row, result).await;
            return Ok(());
        }

        debug!(
            "{}: [{}, {}) differs on {}, drilling down",
            ctx.table,
            chunk.start,
            chunk.end(),
            self.targets[target].name
        );

        let (first, second) = chunk.split();
        let mut stack = vec![second, first];
        while let Some(block) = stack.pop() {
            if block.size == 0 {
                continue;
            }
            if self.cancel.is_cancelled() {
                return Err(CheckError::Cancelled);
            }

            result.checks_issued += 1;
            let (id, mut outcomes) = match self.issue(ctx, block, &[target]).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    self.record_failure(result, Some(target), block, e);
                    continue;
                }
            };
            let row = match outcomes.pop() {
                Some(Ok(row)) => row,
                Some(Err(e)) if e.is_fatal() => return Err(e),
                Some(Err(e)) => {
                    self.record_failure(result, Some(target), block, e);
                    continue;
                }
                None => continue,
            };

            if row.passed() {
                continue;
            }
            if block.size <= self.options.granularity {
                self.report(ctx, target, block, id, &row, result).await;
            } else {
                let (first, second) = block.split();
                stack.push(second);
                stack.push(first);
            }
        }
        Ok(())
    }

    async fn report(
        &self,
        ctx: &TableContext,
        target: usize,
        block: Chunk,
        id: i64,
        row: &ResultRow,
        result: &mut TableScanResult,
    ) {
        let node = &self.targets[target];
        warn!(
            "{}: rows [{}, {}) differ on {} (check #{}, reference {:?} vs target {:?})",
            ctx.table,
            block.start,
            block.end(),
            node.name,
            id,
            row.reference().map(|r| r.count),
            row.local().map(|r| r.count)
        );

        let mut inconsistency = Inconsistency {
            table: ctx.table.full_name(),
            target: node.name.clone(),
            check_id: id,
            start: block.start,
            size: block.size,
            reference: row.reference(),
            local: row.local(),
            reference_rows: Vec::new(),
            target_rows: Vec::new(),
        };

        if self.options.show_rows {
            let descriptor = CheckDescriptor::new(
                id,
                ctx.table.clone(),
                Some(CheckRange {
                    offset: block.start,
                    limit: block.size,
                }),
                self.options.method,
                self.options.check_names,
                self.options.check_types,
            );
            let reference = fetch_rows(&descriptor, &ctx.reference, self.reference.data.as_ref());
            let local = fetch_rows(&descriptor, &ctx.targets[target], node.data.as_ref());
            match tokio::join!(reference, local) {
                (Ok(reference_rows), Ok(target_rows)) => {
                    inconsistency.reference_rows = reference_rows;
                    inconsistency.target_rows = target_rows;
                }
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Could not fetch rows for {}#{}: {}", ctx.table, id, e);
                }
            }
        }

        result.inconsistencies.push(inconsistency);
    }

    fn record_failure(
        &self,
        result: &mut TableScanResult,
        target: Option<usize>,
        chunk: Chunk,
        error: CheckError,
    ) {
        let target = target.map(|i| self.targets[i].name.clone());
        warn!(
            "{}: check of [{}, {}) failed{}: {}",
            result.table,
            chunk.start,
            chunk.end(),
            target.as_deref().map(|t| format!(" on {}", t)).unwrap_or_default(),
            error
        );
        result.failures.push(CheckFailure {
            table: result.table.clone(),
            target,
            start: chunk.start,
            size: chunk.size,
            error: error.to_string(),
        });
    }
}
