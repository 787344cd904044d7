//! Applying staged cache entries to the database.
//!
//! Each staged key is written with its net operation (insert, update or
//! delete) in the order keys were first touched. Cascades run with each
//! entry. The first failure stops the flush; entries already applied stay
//! applied, and the error lists their keys so the caller can decide whether
//! to roll the transaction back.

use crate::cache::{Applied, RowCache};
use rowbind_core::{Connection, Error, OperationError, OperationKind, Result, Value};
use std::time::Instant;

/// Rows written by one flush, by operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

impl FlushSummary {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    fn record(&mut self, applied: Applied) {
        match applied {
            Applied::Inserted => self.inserted += 1,
            Applied::Updated => self.updated += 1,
            Applied::Deleted => self.deleted += 1,
        }
    }
}

/// Write every staged entry of `cache` through `connection`.
#[tracing::instrument(level = "debug", skip(cache, connection))]
pub(crate) fn flush(cache: &mut RowCache, connection: &dyn Connection) -> Result<FlushSummary> {
    let start = Instant::now();
    let pending = cache.pending();
    if pending.is_empty() {
        tracing::trace!("Nothing to flush");
        return Ok(FlushSummary::default());
    }

    let mut summary = FlushSummary::default();
    let mut applied_keys: Vec<Vec<Value>> = Vec::with_capacity(pending.len());
    for (type_id, key) in &pending {
        match cache.apply(connection, *type_id, key) {
            Ok(Some(applied)) => {
                summary.record(applied);
                applied_keys.push(key.values().to_vec());
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    applied = applied_keys.len(),
                    remaining = pending.len() - applied_keys.len(),
                    error = %e,
                    "Flush stopped at first failure"
                );
                let table = match &e {
                    Error::Operation(op) => op.table.clone(),
                    _ => String::new(),
                };
                return Err(Error::Operation(
                    OperationError::new(
                        OperationKind::Flush,
                        table,
                        format!("flush failed after {} applied entries: {}", applied_keys.len(), e),
                    )
                    .with_key(key.values().to_vec())
                    .with_completed(applied_keys.len() as u64)
                    .with_applied(applied_keys)
                    .with_source(e),
                ));
            }
        }
    }

    tracing::info!(
        inserted = summary.inserted,
        updated = summary.updated,
        deleted = summary.deleted,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Flush complete"
    );
    Ok(summary)
}
