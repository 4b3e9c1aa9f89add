//! byteguard - Per-tab, per-domain bandwidth accounting with budget alerts
//!
//! This library provides functionality to:
//! - Attribute completed request sizes to tabs, domains and local hours
//! - Alert when daily usage crosses 80%, 90% and 100% of the budget
//! - Switch low-data mode (image and media blocking) on automatically
//! - Keep domain block rules in step with the user's block list
//!
//! # Examples
//!
//! ```no_run
//! use byteguard::tracker::BandwidthTracker;
//! use byteguard_core::{
//!     clock::SystemClock, notify::TracingNotifier, rules::InMemoryRuleEngine,
//!     store::MemoryStore, timezone::TimezoneConfig, Domain, TabId,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> byteguard::Result<()> {
//!     let tracker = BandwidthTracker::start(
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(InMemoryRuleEngine::new()),
//!         Arc::new(TracingNotifier),
//!         Arc::new(SystemClock),
//!         TimezoneConfig::default(),
//!     )
//!     .await?;
//!
//!     let decision = tracker
//!         .update_usage(TabId::new(1), &Domain::new("video.example.com"), 4 * 1024 * 1024)
//!         .await?;
//!     println!("{decision:?}");
//!
//!     tracker.shutdown().await
//! }
//! ```

pub mod api;
pub mod budget;
pub mod cli;
pub mod feed;
pub mod ledger;
pub mod output;
pub mod persistence;
pub mod scheduler;
pub mod settings;
pub mod tracker;

// Re-export the core crates' shared modules
pub use byteguard_core::{byte_format, clock, error, notify, rules, store, timezone, types};

// Re-export commonly used types
pub use byteguard_core::{ByteguardError, Domain, Result, TabId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
