//! Core types, collaborator traits, and utilities for byteguard
//!
//! This crate provides the foundational types, error handling, timezone
//! configuration and the collaborator seams (key-value store, rule engine,
//! notifier, clock) used by all other byteguard crates.

pub mod byte_format;
pub mod clock;
pub mod error;
pub mod notify;
pub mod rules;
pub mod store;
pub mod timezone;
pub mod types;

// Re-export commonly used types
pub use error::{ByteguardError, Result};
pub use types::{BudgetSettings, Domain, RuleId, Severity, TabId, UsageState};
