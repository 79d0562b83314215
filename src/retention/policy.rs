//! Validated retention policies.
//!
//! A [`Policy`] is built once from configuration at startup and never changes
//! afterwards. All structural checks happen here so the executor can assume
//! every policy it sees is well formed.

use std::collections::HashSet;

use serde::Serialize;

use crate::{
    config::{ConfigError, PolicyConfig},
    models::{CollectionTarget, is_valid_identifier},
};

/// Retention policy for one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Policy {
    /// Collection identifier, used in logs, metrics and reports.
    pub collection: String,
    /// Where the collection's records live.
    pub target: CollectionTarget,
    /// Age-based deletion, if enabled.
    pub age: Option<AgeRule>,
    /// Per-partition cap, if enabled.
    pub cap: Option<CapRule>,
}

/// Delete records older than a fixed number of days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AgeRule {
    pub threshold_days: u32,
    /// Only records whose terminal-state flag is set are eligible.
    pub requires_terminal_state: bool,
}

/// Keep at most `per_partition_cap` most-recent records per owner partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapRule {
    pub per_partition_cap: u64,
}

impl Policy {
    /// Build and validate a single policy.
    pub fn from_config(config: &PolicyConfig) -> Result<Self, ConfigError> {
        let collection = config.collection.trim();
        if collection.is_empty() {
            return Err(ConfigError::Validation(
                "retention policy collection cannot be empty".into(),
            ));
        }
        let invalid = |msg: String| ConfigError::Validation(format!("policy '{collection}': {msg}"));

        if config.age_threshold_days.is_none() && config.per_partition_cap.is_none() {
            return Err(invalid(
                "at least one of age_threshold_days or per_partition_cap must be set".into(),
            ));
        }

        let age = match config.age_threshold_days {
            None => {
                if config.requires_terminal_state {
                    tracing::warn!(
                        collection,
                        "requires_terminal_state has no effect without age_threshold_days"
                    );
                }
                None
            }
            Some(days) if days <= 0 => {
                return Err(invalid(format!(
                    "age_threshold_days must be positive, got {days}"
                )));
            }
            Some(days) => {
                let threshold_days = u32::try_from(days)
                    .map_err(|_| invalid(format!("age_threshold_days {days} is too large")))?;
                if config.requires_terminal_state && config.terminal_column.is_none() {
                    return Err(invalid(
                        "requires_terminal_state is set but terminal_column is missing".into(),
                    ));
                }
                Some(AgeRule {
                    threshold_days,
                    requires_terminal_state: config.requires_terminal_state,
                })
            }
        };

        let cap = match config.per_partition_cap {
            None => None,
            Some(cap) if cap <= 0 => {
                return Err(invalid(format!(
                    "per_partition_cap must be positive, got {cap}"
                )));
            }
            Some(cap) => {
                if config.partition_column.is_none() {
                    return Err(invalid(
                        "per_partition_cap is set but partition_column is missing".into(),
                    ));
                }
                Some(CapRule {
                    per_partition_cap: cap.unsigned_abs(),
                })
            }
        };

        let target = CollectionTarget {
            table: config
                .table
                .clone()
                .unwrap_or_else(|| collection.to_string()),
            id_column: config.id_column.clone(),
            created_at_column: config.created_at_column.clone(),
            partition_column: config.partition_column.clone(),
            terminal_column: config.terminal_column.clone(),
        };

        let identifiers = [
            ("table", Some(&target.table)),
            ("id_column", Some(&target.id_column)),
            ("created_at_column", Some(&target.created_at_column)),
            ("partition_column", target.partition_column.as_ref()),
            ("terminal_column", target.terminal_column.as_ref()),
        ];
        for (field, value) in identifiers {
            if let Some(value) = value
                && !is_valid_identifier(value)
            {
                return Err(invalid(format!(
                    "{field} '{value}' is not a valid SQL identifier"
                )));
            }
        }

        Ok(Policy {
            collection: collection.to_string(),
            target,
            age,
            cap,
        })
    }

    /// Build every configured policy, preserving declaration order.
    ///
    /// Collection ids must be unique.
    pub fn load_all(configs: &[PolicyConfig]) -> Result<Vec<Self>, ConfigError> {
        let mut seen = HashSet::new();
        let mut policies = Vec::with_capacity(configs.len());

        for config in configs {
            let policy = Self::from_config(config)?;
            if !seen.insert(policy.collection.clone()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate retention policy for collection '{}'",
                    policy.collection
                )));
            }
            policies.push(policy);
        }

        Ok(policies)
    }
}
