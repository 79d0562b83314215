//! Data retention engine.
//!
//! Keeps append-only collections bounded. Each configured [`Policy`] may carry
//! an age rule (delete records older than N days, optionally only once they
//! reach a terminal state) and a cap rule (keep only the N most recent records
//! per owner partition).
//!
//! A [`RetentionRunner`] applies every policy in declaration order inside one
//! transaction: the age rule first, then the cap rule over the survivors. Any
//! storage failure rolls the entire run back, and the next run retries it.
//! [`RetentionScheduler`] drives the runner on a fixed-rate timer and never
//! lets two runs overlap.

mod executor;
mod policy;
mod run;
mod scheduler;

pub use executor::{apply_age_rule, apply_cap_rule};
pub use policy::{AgeRule, CapRule, Policy};
pub use run::{PolicyOutcome, RetentionError, RetentionReport, RetentionRunner};
pub use scheduler::{RetentionScheduler, TickOutcome};
