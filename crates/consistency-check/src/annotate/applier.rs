//! Target-side application of annotated check events.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::traits::{Dialect, SqlConnection};
use crate::core::value::Row;
use crate::digest::compute_digest;
use crate::drivers::DialectImpl;
use crate::error::Result;
use crate::store::ResultStore;

use super::event::{ChangeEvent, CheckWrite, ColumnSpec, EventFragment, RowAction};
use super::filter::EventFilter;

/// Applies check events on a target node.
///
/// An issued check is answered by computing the digest locally on the data
/// connection; reference results are copied into the store as they arrive.
/// Events without a check are replayed on the data connection, so a check
/// sees every change that preceded it in the stream.
pub struct CheckApplier {
    data: Arc<dyn SqlConnection>,
    store: ResultStore,
}

impl CheckApplier {
    pub fn new(data: Arc<dyn SqlConnection>, store: ResultStore) -> Self {
        Self { data, store }
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Apply one filtered event. Returns `false` for events that carry no check.
    pub async fn apply(&self, event: &ChangeEvent) -> Result<bool> {
        let Some(check) = &event.check else {
            for fragment in &event.fragments {
                self.replay(fragment).await?;
            }
            return Ok(false);
        };
        let descriptor = &check.descriptor;

        match &check.write {
            CheckWrite::Issued { reference } => {
                let local = compute_digest(descriptor, self.data.as_ref()).await?;
                self.store.record_local(descriptor, &local).await?;
                if let Some(reference) = reference {
                    self.store.record_reference(descriptor, reference).await?;
                }
                debug!(
                    "Applied {} (seqno {}): {} rows locally",
                    descriptor, event.seqno, local.count
                );
            }
            CheckWrite::ReferenceResult(reference) => {
                self.store.record_reference(descriptor, reference).await?;
                debug!("Applied reference result for {} (seqno {})", descriptor, event.seqno);
            }
        }
        Ok(true)
    }

    async fn replay(&self, fragment: &EventFragment) -> Result<()> {
        match fragment {
            EventFragment::Statement { query, .. } => {
                self.data.execute(query, &[]).await?;
            }
            EventFragment::RowChanges {
                schema,
                table,
                action,
                columns,
                rows,
                key_columns,
                keys,
            } => {
                let dialect = DialectImpl::for_connection(self.data.as_ref())?;
                let qualified = dialect.qualify(schema, table)?;
                let sql = row_change_sql(&dialect, &qualified, *action, columns, key_columns)?;
                let params: Vec<Row> = match action {
                    RowAction::Insert => rows.clone(),
                    RowAction::Update => rows
                        .iter()
                        .zip(keys)
                        .map(|(row, key)| row.iter().chain(key).cloned().collect())
                        .collect(),
                    RowAction::Delete => keys.clone(),
                };
                for row in &params {
                    self.data.execute(&sql, row).await?;
                }
                debug!("Replayed {} row(s) on {}", params.len(), qualified);
            }
        }
        Ok(())
    }

    /// Filter and apply events until the channel closes or `cancel` fires.
    ///
    /// A check that fails to apply is logged and skipped; the orchestrator
    /// observes it as a timeout.
    pub async fn run<F>(
        self,
        filter: F,
        mut events: mpsc::Receiver<ChangeEvent>,
        cancel: CancellationToken,
    ) -> Result<u64>
    where
        F: EventFilter,
    {
        let mut applied = 0u64;
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let seqno = event.seqno;
            let event = match filter.filter(event) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Dropping event {}: {}", seqno, e);
                    continue;
                }
            };

            match self.apply(&event).await {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to apply event {}: {}", seqno, e),
            }
        }
        info!("Check applier on {} stopped after {} checks", self.data.engine(), applied);
        Ok(applied)
    }
}

/// Single-row statement for one row image; parameters are the row values
/// followed by the key values.
fn row_change_sql(
    dialect: &DialectImpl,
    qualified: &str,
    action: RowAction,
    columns: &[ColumnSpec],
    key_columns: &[ColumnSpec],
) -> Result<String> {
    let assign = |specs: &[ColumnSpec], first: usize| -> Result<Vec<String>> {
        specs
            .iter()
            .enumerate()
            .map(|(i, c)| {
                Ok(format!(
                    "{} = {}",
                    dialect.quote_ident(&c.name)?,
                    dialect.param_placeholder(first + i)
                ))
            })
            .collect()
    };

    let sql = match action {
        RowAction::Insert => format!(
            "INSERT INTO {} ({}) VALUES ({})",
            qualified,
            columns
                .iter()
                .map(|c| dialect.quote_ident(&c.name))
                .collect::<Result<Vec<_>>>()?
                .join(", "),
            (1..=columns.len())
                .map(|i| dialect.param_placeholder(i))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        RowAction::Update => format!(
            "UPDATE {} SET {} WHERE {}",
            qualified,
            assign(columns, 1)?.join(", "),
            assign(key_columns, columns.len() + 1)?.join(" AND ")
        ),
        RowAction::Delete => format!(
            "DELETE FROM {} WHERE {}",
            qualified,
            assign(key_columns, 1)?.join(" AND ")
        ),
    };
    Ok(sql)
}
