//! Data retention configuration.
//!
//! Declares the retention policies applied to each retained collection and
//! how often they run.
//!
//! # Example
//!
//! ```toml
//! [retention]
//! enabled = true
//! interval_hours = 24
//! dry_run = false
//!
//! [[retention.policies]]
//! collection = "notifications"
//! age_threshold_days = 90
//! requires_terminal_state = true
//! terminal_column = "is_read"
//! per_partition_cap = 500
//! partition_column = "user_id"
//! ```
//!
//! Every policy knob can also be set from the environment; see
//! [`RetentionConfig::apply_overrides`].

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Prefix shared by all retention environment overrides.
pub const ENV_PREFIX: &str = "SWEEPER_RETENTION_";

/// Data retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Whether the scheduler runs at all. Manual `run-once` ignores this flag.
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Hours between scheduled runs, measured from scheduler start.
    /// Default: 24 (once per day)
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Count what would be deleted, then roll back instead of committing.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,

    /// Policies, applied in declaration order.
    /// Declaring any policy replaces the built-in set.
    #[serde(default = "default_policies")]
    pub policies: Vec<PolicyConfig>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_hours: default_interval_hours(),
            dry_run: false,
            policies: default_policies(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_hours() -> u64 {
    24
}

/// Retention policy for one collection.
///
/// Only `collection` is required by the parser; whether the combination of
/// rules makes sense is checked when policies are loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Collection identifier. Also the table name unless `table` is set.
    pub collection: String,

    /// Table holding the collection, if it differs from `collection`.
    #[serde(default)]
    pub table: Option<String>,

    /// Unique record key, used to break ties between equal timestamps.
    #[serde(default = "default_id_column")]
    pub id_column: String,

    /// Creation timestamp column.
    #[serde(default = "default_created_at_column")]
    pub created_at_column: String,

    /// Owner partition column. Required when `per_partition_cap` is set.
    #[serde(default)]
    pub partition_column: Option<String>,

    /// Boolean terminal-state column (e.g. `is_read`).
    /// Required when `requires_terminal_state` is true.
    #[serde(default)]
    pub terminal_column: Option<String>,

    /// Records older than this many days are eligible for deletion.
    #[serde(default)]
    pub age_threshold_days: Option<i64>,

    /// Only age-delete records whose terminal-state column is true.
    #[serde(default)]
    pub requires_terminal_state: bool,

    /// Maximum records kept per owner partition, most recent first.
    #[serde(default)]
    pub per_partition_cap: Option<i64>,
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_created_at_column() -> String {
    "created_at".to_string()
}

/// Built-in policies for the collections created by the bundled migrations.
pub fn default_policies() -> Vec<PolicyConfig> {
    vec![
        PolicyConfig {
            collection: "notifications".to_string(),
            table: None,
            id_column: default_id_column(),
            created_at_column: default_created_at_column(),
            partition_column: Some("user_id".to_string()),
            terminal_column: Some("is_read".to_string()),
            age_threshold_days: Some(90),
            requires_terminal_state: true,
            per_partition_cap: Some(500),
        },
        PolicyConfig {
            collection: "integration_logs".to_string(),
            table: None,
            id_column: default_id_column(),
            created_at_column: default_created_at_column(),
            partition_column: Some("integration_id".to_string()),
            terminal_column: None,
            age_threshold_days: Some(30),
            requires_terminal_state: false,
            per_partition_cap: Some(1000),
        },
        PolicyConfig {
            collection: "audit_logs".to_string(),
            table: None,
            id_column: default_id_column(),
            created_at_column: default_created_at_column(),
            partition_column: Some("org_id".to_string()),
            terminal_column: None,
            age_threshold_days: Some(365),
            requires_terminal_state: false,
            per_partition_cap: None,
        },
    ]
}

impl RetentionConfig {
    /// Get the interval as a Duration.
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_hours.saturating_mul(3600))
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply key/value overrides.
    ///
    /// Recognised keys:
    /// - `SWEEPER_RETENTION_ENABLED`, `SWEEPER_RETENTION_DRY_RUN` (`true`/`false`)
    /// - `SWEEPER_RETENTION_INTERVAL_HOURS`
    /// - `SWEEPER_RETENTION_<COLLECTION>_TTL_DAYS`
    /// - `SWEEPER_RETENTION_<COLLECTION>_CAP`
    ///
    /// `<COLLECTION>` is the collection id upper-cased, with any character
    /// outside `[A-Z0-9]` replaced by `_`. Setting a TTL or cap key to `none`
    /// removes that rule. Keys for collections that are not configured are
    /// ignored.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |suffix: &str| {
            let key = format!("{ENV_PREFIX}{suffix}");
            lookup(&key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (key, v))
        };

        if let Some((key, value)) = get("ENABLED") {
            self.enabled = parse_bool(&key, &value)?;
        }
        if let Some((key, value)) = get("DRY_RUN") {
            self.dry_run = parse_bool(&key, &value)?;
        }
        if let Some((key, value)) = get("INTERVAL_HOURS") {
            self.interval_hours = value.parse().map_err(|_| {
                ConfigError::Validation(format!(
                    "{key} must be a whole number of hours, got '{value}'"
                ))
            })?;
        }

        for policy in &mut self.policies {
            let name = env_key_fragment(&policy.collection);
            if let Some((key, value)) = get(&format!("{name}_TTL_DAYS")) {
                policy.age_threshold_days = parse_optional_int(&key, &value)?;
            }
            if let Some((key, value)) = get(&format!("{name}_CAP")) {
                policy.per_partition_cap = parse_optional_int(&key, &value)?;
            }
        }

        Ok(())
    }

    /// Validate settings that don't depend on policy semantics.
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_hours == 0 {
            return Err(ConfigError::Validation(
                "retention.interval_hours must be at least 1".into(),
            ));
        }
        if self.policies.is_empty() {
            tracing::warn!("No retention policies configured; runs will delete nothing");
        }
        Ok(())
    }
}

/// Upper-case a collection id into an environment key fragment.
pub fn env_key_fragment(collection: &str) -> String {
    collection
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Validation(format!(
            "{key} must be true or false, got '{value}'"
        ))),
    }
}

fn parse_optional_int(key: &str, value: &str) -> Result<Option<i64>, ConfigError> {
    if value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    value.parse().map(Some).map_err(|_| {
        ConfigError::Validation(format!(
            "{key} must be an integer or 'none', got '{value}'"
        ))
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn policy<'a>(config: &'a RetentionConfig, collection: &str) -> &'a PolicyConfig {
        config
            .policies
            .iter()
            .find(|p| p.collection == collection)
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = RetentionConfig::default();
        assert!(config.enabled);
        assert!(!config.dry_run);
        assert_eq!(config.interval_hours, 24);
        assert_eq!(config.policies.len(), 3);

        let notifications = policy(&config, "notifications");
        assert_eq!(notifications.age_threshold_days, Some(90));
        assert!(notifications.requires_terminal_state);
        assert_eq!(notifications.terminal_column.as_deref(), Some("is_read"));
        assert_eq!(notifications.per_partition_cap, Some(500));
        assert_eq!(notifications.partition_column.as_deref(), Some("user_id"));

        assert_eq!(policy(&config, "audit_logs").per_partition_cap, None);
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: RetentionConfig = toml::from_str("enabled = false").unwrap();
        assert!(!config.enabled);
        assert_eq!(config.interval_hours, 24);
        assert_eq!(config.policies.len(), 3, "built-in policies apply");
    }

    #[test]
    fn test_declared_policies_replace_defaults() {
        let config: RetentionConfig = toml::from_str(
            r#"
            interval_hours = 6

            [[policies]]
            collection = "webhook_deliveries"
            age_threshold_days = 14
            per_partition_cap = 200
            partition_column = "endpoint_id"
            created_at_column = "delivered_at"
        "#,
        )
        .unwrap();

        assert_eq!(config.interval_hours, 6);
        assert_eq!(config.policies.len(), 1);
        let p = &config.policies[0];
        assert_eq!(p.collection, "webhook_deliveries");
        assert_eq!(p.id_column, "id");
        assert_eq!(p.created_at_column, "delivered_at");
        assert!(!p.requires_terminal_state);
        assert_eq!(p.table, None);
    }

    #[test]
    fn test_interval_duration() {
        let mut config = RetentionConfig::default();
        assert_eq!(config.interval(), std::time::Duration::from_secs(24 * 3600));

        config.interval_hours = 6;
        assert_eq!(config.interval(), std::time::Duration::from_secs(6 * 3600));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = RetentionConfig {
            interval_hours: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides_per_collection() {
        let mut config = RetentionConfig::default();
        config
            .apply_overrides(lookup(&[
                ("SWEEPER_RETENTION_NOTIFICATIONS_TTL_DAYS", "30"),
                ("SWEEPER_RETENTION_NOTIFICATIONS_CAP", "none"),
                ("SWEEPER_RETENTION_AUDIT_LOGS_CAP", "10000"),
                ("SWEEPER_RETENTION_INTERVAL_HOURS", "12"),
                ("SWEEPER_RETENTION_DRY_RUN", "true"),
            ]))
            .unwrap();

        assert_eq!(config.interval_hours, 12);
        assert!(config.dry_run);
        assert_eq!(policy(&config, "notifications").age_threshold_days, Some(30));
        assert_eq!(policy(&config, "notifications").per_partition_cap, None);
        assert_eq!(policy(&config, "audit_logs").per_partition_cap, Some(10000));
        // Untouched knobs keep their defaults.
        assert_eq!(policy(&config, "integration_logs").age_threshold_days, Some(30));
    }

    #[test]
    fn test_empty_override_uses_default() {
        let mut config = RetentionConfig::default();
        config
            .apply_overrides(lookup(&[("SWEEPER_RETENTION_NOTIFICATIONS_TTL_DAYS", "  ")]))
            .unwrap();
        assert_eq!(policy(&config, "notifications").age_threshold_days, Some(90));
    }

    #[test]
    fn test_bad_override_rejected() {
        let mut config = RetentionConfig::default();
        let err = config
            .apply_overrides(lookup(&[("SWEEPER_RETENTION_NOTIFICATIONS_CAP", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("SWEEPER_RETENTION_NOTIFICATIONS_CAP"));

        let err = config
            .apply_overrides(lookup(&[("SWEEPER_RETENTION_ENABLED", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("true or false"));
    }

    #[test]
    fn test_env_key_fragment() {
        assert_eq!(env_key_fragment("notifications"), "NOTIFICATIONS");
        assert_eq!(env_key_fragment("audit-logs.v2"), "AUDIT_LOGS_V2");
    }

    #[test]
    fn test_apply_env_overrides_reads_process_env() {
        temp_env::with_var("SWEEPER_RETENTION_INTEGRATION_LOGS_TTL_DAYS", Some("7"), || {
            let mut config = RetentionConfig::default();
            config.apply_env_overrides().unwrap();
            assert_eq!(policy(&config, "integration_logs").age_threshold_days, Some(7));
        });
    }
}
