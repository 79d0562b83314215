//! Applies a single policy inside an already-open transaction.
//!
//! The two rules are separate functions so the run can order them: the age
//! rule always runs first, and the cap rule ranks whatever survived it.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::Instrument;

use super::Policy;
use crate::db::{DbResult, RetentionTransaction};

/// Delete records older than the policy's age threshold.
///
/// Returns the number of records deleted, or 0 without touching storage when
/// the policy has no age rule.
pub async fn apply_age_rule(
    policy: &Policy,
    tx: &mut dyn RetentionTransaction,
    now: DateTime<Utc>,
) -> DbResult<u64> {
    let Some(rule) = policy.age else {
        return Ok(0);
    };

    let Some(cutoff) = TimeDelta::try_days(i64::from(rule.threshold_days))
        .and_then(|ttl| now.checked_sub_signed(ttl))
    else {
        // The cutoff predates any representable timestamp.
        return Ok(0);
    };

    let span = tracing::debug_span!(
        "retention_rule",
        collection = %policy.collection,
        rule = "age",
    );

    async {
        let deleted = tx
            .delete_created_before(&policy.target, cutoff, rule.requires_terminal_state)
            .await?;
        tracing::debug!(
            deleted,
            %cutoff,
            requires_terminal_state = rule.requires_terminal_state,
            "Applied age rule"
        );
        Ok(deleted)
    }
    .instrument(span)
    .await
}

/// Delete records ranked beyond the policy's per-partition cap.
///
/// Must be called after [`apply_age_rule`] for the same policy and
/// transaction. Returns 0 without touching storage when the policy has no
/// cap rule.
pub async fn apply_cap_rule(policy: &Policy, tx: &mut dyn RetentionTransaction) -> DbResult<u64> {
    let Some(rule) = policy.cap else {
        return Ok(0);
    };

    let span = tracing::debug_span!(
        "retention_rule",
        collection = %policy.collection,
        rule = "cap",
    );

    async {
        let deleted = tx
            .delete_beyond_rank(&policy.target, rule.per_partition_cap)
            .await?;
        tracing::debug!(deleted, cap = rule.per_partition_cap, "Applied cap rule");
        Ok(deleted)
    }
    .instrument(span)
    .await
}
