use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::{
    db::{
        error::DbResult,
        repos::{RetentionRepo, RetentionTransaction, partition_column, terminal_column},
    },
    models::CollectionTarget,
};

pub struct SqliteRetentionRepo {
    pool: SqlitePool,
}

impl SqliteRetentionRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RetentionRepo for SqliteRetentionRepo {
    async fn begin(&self) -> DbResult<Box<dyn RetentionTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteRetentionTransaction { tx }))
    }
}

struct SqliteRetentionTransaction {
    tx: Transaction<'static, Sqlite>,
}

// `created_at` is TEXT. Producers may write sqlx's RFC 3339 form
// (`2025-03-03T12:00:00+00:00`) or SQLite's own `datetime()` form
// (`2025-03-03 12:00:00`), which do not order correctly as strings, so every
// comparison and sort goes through `julianday()`.
#[async_trait]
impl RetentionTransaction for SqliteRetentionTransaction {
    async fn delete_created_before(
        &mut self,
        target: &CollectionTarget,
        cutoff: DateTime<Utc>,
        require_terminal: bool,
    ) -> DbResult<u64> {
        let result = if require_terminal {
            let sql = format!(
                "DELETE FROM {table} WHERE julianday({created_at}) < julianday(?) AND {terminal} = ?",
                table = target.table,
                created_at = target.created_at_column,
                terminal = terminal_column(target)?,
            );
            sqlx::query(&sql)
                .bind(cutoff)
                .bind(true)
                .execute(&mut *self.tx)
                .await?
        } else {
            let sql = format!(
                "DELETE FROM {table} WHERE julianday({created_at}) < julianday(?)",
                table = target.table,
                created_at = target.created_at_column,
            );
            sqlx::query(&sql)
                .bind(cutoff)
                .execute(&mut *self.tx)
                .await?
        };

        Ok(result.rows_affected())
    }

    async fn delete_beyond_rank(&mut self, target: &CollectionTarget, cap: u64) -> DbResult<u64> {
        // ROW_NUMBER() needs SQLite 3.25+, which every bundled libsqlite3 ships.
        let sql = format!(
            r#"
            DELETE FROM {table}
            WHERE {id} IN (
                SELECT ranked.{id} FROM (
                    SELECT {id}, ROW_NUMBER() OVER (
                        PARTITION BY {partition}
                        ORDER BY julianday({created_at}) DESC, {id} DESC
                    ) AS retention_rank
                    FROM {table}
                    WHERE {partition} IS NOT NULL
                ) AS ranked
                WHERE ranked.retention_rank > ?
            )
            "#,
            table = target.table,
            id = target.id_column,
            partition = partition_column(target)?,
            created_at = target.created_at_column,
        );

        let result = sqlx::query(&sql)
            .bind(i64::try_from(cap).unwrap_or(i64::MAX))
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
