//! A single retention pass over every configured policy.

use std::{sync::Arc, time::Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use super::{Policy, apply_age_rule, apply_cap_rule};
use crate::{
    db::{DbError, RetentionRepo, RetentionTransaction},
    observability::metrics,
};

/// Errors from a retention run.
#[derive(Debug, thiserror::Error)]
pub enum RetentionError {
    /// The transaction or one of its deletes failed. The whole run was rolled
    /// back and can be retried as is.
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),
}

/// Deletions made for one policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyOutcome {
    pub collection: String,
    pub age_deleted: u64,
    pub cap_deleted: u64,
}

impl PolicyOutcome {
    pub fn total(&self) -> u64 {
        self.age_deleted + self.cap_deleted
    }
}

/// Results from a single retention run.
#[derive(Debug, Clone, Serialize)]
pub struct RetentionReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Counts are what would have been deleted; nothing was committed.
    pub dry_run: bool,
    /// One entry per policy, in declaration order.
    pub policies: Vec<PolicyOutcome>,
}

impl RetentionReport {
    /// Total number of records deleted across all policies.
    pub fn total(&self) -> u64 {
        self.policies.iter().map(PolicyOutcome::total).sum()
    }

    /// Check if any records were deleted.
    pub fn has_deletions(&self) -> bool {
        self.total() > 0
    }

    /// Look up the outcome for a collection.
    pub fn policy(&self, collection: &str) -> Option<&PolicyOutcome> {
        self.policies.iter().find(|p| p.collection == collection)
    }
}

/// Applies the configured policies in one transaction.
///
/// This is the single entry point for retention: the scheduler and the
/// `run-once` command both call [`run_once`](Self::run_once).
pub struct RetentionRunner {
    repo: Arc<dyn RetentionRepo>,
    policies: Vec<Policy>,
    dry_run: bool,
}

impl RetentionRunner {
    pub fn new(repo: Arc<dyn RetentionRepo>, policies: Vec<Policy>) -> Self {
        Self {
            repo,
            policies,
            dry_run: false,
        }
    }

    /// Roll every run back instead of committing it.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run every policy once against the current time.
    pub async fn run_once(&self) -> Result<RetentionReport, RetentionError> {
        self.run_at(Utc::now()).await
    }

    /// Run every policy once, computing age cutoffs from `now`.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RetentionReport, RetentionError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("retention_run", %run_id, dry_run = self.dry_run);

        async {
            let started = Instant::now();
            let result = self.apply_all(now).await;
            let duration = started.elapsed();
            let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok(policies) => {
                    let report = RetentionReport {
                        run_id,
                        started_at: now,
                        duration_ms,
                        dry_run: self.dry_run,
                        policies,
                    };

                    for outcome in &report.policies {
                        tracing::info!(
                            collection = %outcome.collection,
                            age_deleted = outcome.age_deleted,
                            cap_deleted = outcome.cap_deleted,
                            "Retention policy applied"
                        );
                        if !self.dry_run {
                            metrics::record_retention_deletion(
                                &outcome.collection,
                                "age",
                                outcome.age_deleted,
                            );
                            metrics::record_retention_deletion(
                                &outcome.collection,
                                "cap",
                                outcome.cap_deleted,
                            );
                        }
                    }

                    tracing::info!(
                        total_deleted = report.total(),
                        duration_ms,
                        outcome = "success",
                        "Retention run complete{}",
                        if self.dry_run { " (DRY RUN)" } else { "" }
                    );
                    metrics::record_retention_run("success", duration.as_secs_f64());

                    Ok(report)
                }
                Err(e) => {
                    tracing::error!(
                        total_deleted = 0u64,
                        duration_ms,
                        outcome = "failure",
                        error = %e,
                        "Retention run failed, all changes rolled back"
                    );
                    metrics::record_retention_run("failure", duration.as_secs_f64());

                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Apply all policies in one transaction, then commit (or roll back for a
    /// dry run). Any failure rolls back the whole run.
    async fn apply_all(&self, now: DateTime<Utc>) -> Result<Vec<PolicyOutcome>, RetentionError> {
        let mut tx = self.repo.begin().await?;
        let mut outcomes = Vec::with_capacity(self.policies.len());

        for policy in &self.policies {
            match apply_policy(policy, tx.as_mut(), now).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::error!(
                            error = %rollback_err,
                            "Failed to roll back retention transaction"
                        );
                    }
                    return Err(e.into());
                }
            }
        }

        if self.dry_run {
            tx.rollback().await?;
        } else {
            tx.commit().await?;
        }

        Ok(outcomes)
    }
}

/// Age rule first, then the cap rule over what survived it.
async fn apply_policy(
    policy: &Policy,
    tx: &mut dyn RetentionTransaction,
    now: DateTime<Utc>,
) -> Result<PolicyOutcome, DbError> {
    let age_deleted = apply_age_rule(policy, tx, now).await?;
    let cap_deleted = apply_cap_rule(policy, tx).await?;

    Ok(PolicyOutcome {
        collection: policy.collection.clone(),
        age_deleted,
        cap_deleted,
    })
}
