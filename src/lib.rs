//! Data retention and lifecycle enforcement for append-only collections.
//!
//! The engine deletes records from per-owner record streams (notifications,
//! integration logs, audit logs) according to declarative policies: an age
//! rule, a per-partition cap, or both. See [`retention`] for the run model and
//! [`config`] for how policies are declared.

pub mod config;
pub mod db;
pub mod models;
pub mod observability;
pub mod retention;
