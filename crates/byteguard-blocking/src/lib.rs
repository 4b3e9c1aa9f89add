//! Low-data mode and domain blocking for byteguard
//!
//! The [`BlockingRuleSynchronizer`] is the only writer of the rule engine's
//! dynamic table. [`rule_table`] holds the id layout and the rule builders.

pub mod rule_table;
pub mod synchronizer;

pub use rule_table::{DomainRuleTable, IMAGE_RULE_ID, MEDIA_RULE_ID};
pub use synchronizer::{AUTO_ENABLE_THRESHOLD, BlockingRuleSynchronizer, LowDataStatus};
