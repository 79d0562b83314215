use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::{
    db::{
        error::DbResult,
        repos::{RetentionRepo, RetentionTransaction, partition_column, terminal_column},
    },
    models::CollectionTarget,
};

pub struct PostgresRetentionRepo {
    write_pool: PgPool,
}

impl PostgresRetentionRepo {
    pub fn new(write_pool: PgPool) -> Self {
        Self { write_pool }
    }
}

#[async_trait]
impl RetentionRepo for PostgresRetentionRepo {
    async fn begin(&self) -> DbResult<Box<dyn RetentionTransaction>> {
        let mut tx = self.write_pool.begin().await?;

        // Both rules of every policy must see the same snapshot; rows inserted
        // while the run is in progress stay invisible to it. The cost: a
        // producer updating a row this run deletes (e.g. flipping `is_read`)
        // surfaces as a serialization failure, and the whole run rolls back
        // until the next interval.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PostgresRetentionTransaction { tx }))
    }
}

struct PostgresRetentionTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RetentionTransaction for PostgresRetentionTransaction {
    async fn delete_created_before(
        &mut self,
        target: &CollectionTarget,
        cutoff: DateTime<Utc>,
        require_terminal: bool,
    ) -> DbResult<u64> {
        let result = if require_terminal {
            let sql = format!(
                "DELETE FROM {table} WHERE {created_at} < $1 AND {terminal} = $2",
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
                "DELETE FROM {table} WHERE {created_at} < $1",
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
        let sql = format!(
            r#"
            DELETE FROM {table}
            WHERE {id} IN (
                SELECT ranked.{id} FROM (
                    SELECT {id}, ROW_NUMBER() OVER (
                        PARTITION BY {partition}
                        ORDER BY {created_at} DESC, {id} DESC
                    ) AS retention_rank
                    FROM {table}
                    WHERE {partition} IS NOT NULL
                ) AS ranked
                WHERE ranked.retention_rank > $1
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
