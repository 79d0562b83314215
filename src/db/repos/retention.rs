use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    db::error::{DbError, DbResult},
    models::CollectionTarget,
};

/// Storage access for the retention engine.
///
/// A repository only knows how to open a transaction. Every delete happens
/// through the returned [`RetentionTransaction`], so a whole retention run
/// commits or rolls back as one unit.
#[async_trait]
pub trait RetentionRepo: Send + Sync {
    /// Open a transaction for a single retention run.
    async fn begin(&self) -> DbResult<Box<dyn RetentionTransaction>>;
}

/// An open retention transaction.
///
/// Dropping a transaction without calling [`commit`](Self::commit) rolls it
/// back.
#[async_trait]
pub trait RetentionTransaction: Send {
    /// Delete records created strictly before `cutoff`.
    ///
    /// When `require_terminal` is true only records whose terminal-state
    /// column is true are eligible. Returns the number of rows deleted.
    async fn delete_created_before(
        &mut self,
        target: &CollectionTarget,
        cutoff: DateTime<Utc>,
        require_terminal: bool,
    ) -> DbResult<u64>;

    /// Delete every record ranked beyond `cap` within its owner partition.
    ///
    /// Records are ranked per partition by `(created_at DESC, id DESC)`.
    /// Records with a NULL partition value are never ranked or deleted.
    /// Returns the number of rows deleted.
    async fn delete_beyond_rank(&mut self, target: &CollectionTarget, cap: u64) -> DbResult<u64>;

    /// Commit all deletes made through this transaction.
    async fn commit(self: Box<Self>) -> DbResult<()>;

    /// Discard all deletes made through this transaction.
    async fn rollback(self: Box<Self>) -> DbResult<()>;
}

/// Column holding the terminal-state flag, or an error if the target has none.
pub(crate) fn terminal_column(target: &CollectionTarget) -> DbResult<&str> {
    target
        .terminal_column
        .as_deref()
        .ok_or_else(|| DbError::MissingColumn {
            table: target.table.clone(),
            column: "terminal-state",
        })
}

/// Column holding the owner partition key, or an error if the target has none.
pub(crate) fn partition_column(target: &CollectionTarget) -> DbResult<&str> {
    target
        .partition_column
        .as_deref()
        .ok_or_else(|| DbError::MissingColumn {
            table: target.table.clone(),
            column: "partition",
        })
}
