//! CLI interface for byteguard
//!
//! This module defines the command-line interface using clap. The CLI drives
//! the accounting core the way a host process would: events come from JSONL
//! files or stdin, state lives in a data directory.
//!
//! # Example
//!
//! ```bash
//! # Feed recorded events and show the result
//! byteguard replay events.jsonl
//!
//! # Stream events from another process, resetting daily at local midnight
//! capture-requests | byteguard watch --timezone Europe/Berlin
//!
//! # Block a domain and switch low-data mode on
//! byteguard block video.example.com
//! byteguard toggle
//! ```

use byteguard_core::error::{ByteguardError, Result};
use byteguard_core::types::{BudgetSettings, GIB, MIB};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Name of the state file inside the data directory
pub const STATE_FILE: &str = "state.json";

/// Name of the rule table file inside the data directory
pub const RULES_FILE: &str = "rules.json";

/// Track bandwidth usage against a budget and block heavy content
#[derive(Parser, Debug, Clone)]
#[command(name = "byteguard")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Show informational output (default is quiet mode with only warnings and errors)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Directory holding the state and rule files
    #[arg(long, env = "BYTEGUARD_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Timezone for hourly buckets and the daily reset (e.g. "America/New_York", "UTC")
    /// If not specified, uses the system's local timezone
    #[arg(long, short = 'z', global = true)]
    pub timezone: Option<String>,

    /// Use UTC (overrides --timezone)
    #[arg(long, global = true)]
    pub utc: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// On/off switch argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    /// Whether the switch is on
    pub fn is_on(self) -> bool {
        self == Switch::On
    }
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Feed a JSONL event file into the tracker
    Replay {
        /// File with one event per line
        file: PathBuf,
    },

    /// Read events from stdin until EOF or Ctrl+C, resetting daily at local midnight
    Watch,

    /// Show usage, budget and blocking state
    Status,

    /// Toggle low-data mode (image and media blocking)
    Toggle,

    /// Block every load from a domain
    Block {
        /// Hostname to block
        domain: String,
    },

    /// Lift a domain block
    Unblock {
        /// Hostname to unblock
        domain: String,
    },

    /// Allow or forbid automatic low-data mode at 90% of the daily budget
    AutoLowData {
        #[arg(value_enum)]
        state: Switch,
    },

    /// Show or change budget settings
    Budget {
        /// Daily budget in MB
        #[arg(long)]
        daily: Option<u64>,

        /// Monthly budget in GB
        #[arg(long)]
        monthly: Option<u64>,

        /// Alert threshold in percent
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
        threshold: Option<u8>,

        /// Enable or disable budget alert notifications
        #[arg(long, value_enum)]
        alerts: Option<Switch>,
    },

    /// Start a new accounting day now
    ResetDaily,

    /// Erase all stored data and restore install defaults
    Clear,
}

/// Changes requested by the `budget` command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BudgetChanges {
    pub daily_mb: Option<u64>,
    pub monthly_gb: Option<u64>,
    pub threshold: Option<u8>,
    pub alerts: Option<bool>,
}

impl BudgetChanges {
    /// Whether anything is to be changed
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the changes, converting MB/GB to bytes
    pub fn apply(&self, settings: &mut BudgetSettings) -> Result<()> {
        if let Some(mb) = self.daily_mb {
            settings.daily_budget = mb.checked_mul(MIB).ok_or_else(|| {
                ByteguardError::InvalidArgument(format!("daily budget {mb} MB is too large"))
            })?;
        }
        if let Some(gb) = self.monthly_gb {
            settings.monthly_budget = gb.checked_mul(GIB).ok_or_else(|| {
                ByteguardError::InvalidArgument(format!("monthly budget {gb} GB is too large"))
            })?;
        }
        if let Some(threshold) = self.threshold {
            settings.alert_threshold = threshold;
        }
        if let Some(alerts) = self.alerts {
            settings.alerts_enabled = alerts;
        }
        Ok(())
    }
}

/// Resolve the data directory: explicit flag/env first, then the platform
/// data directory
pub fn resolve_data_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    dirs::data_dir()
        .map(|dir| dir.join("byteguard"))
        .ok_or_else(|| {
            ByteguardError::Config(
                "Could not determine a data directory; pass --data-dir or set BYTEGUARD_DATA_DIR"
                    .to_string(),
            )
        })
}
