//! Core domain types for byteguard
//!
//! This module contains the fundamental types shared by the ledger, the
//! budget evaluator and the blocking rule synchronizer. Persisted types keep
//! camelCase field names so state written by the browser extension can be
//! read back unchanged.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{ByteguardError, Result};

/// One mebibyte, the unit budgets are entered in
pub const MIB: u64 = 1024 * 1024;

/// One gibibyte
pub const GIB: u64 = 1024 * MIB;

/// Identifier of a browser tab
///
/// Event sources use `-1` for requests that do not belong to a tab; such ids
/// never make it into a `TabId`.
///
/// # Examples
/// ```
/// use byteguard_core::types::TabId;
///
/// assert_eq!(TabId::from_raw(7), Some(TabId::new(7)));
/// assert_eq!(TabId::from_raw(-1), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(u32);

impl TabId {
    /// Create a new TabId
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Convert a raw event tab id, rejecting the "no tab" sentinel and
    /// anything else out of range
    pub fn from_raw(raw: i64) -> Option<Self> {
        u32::try_from(raw).ok().map(Self)
    }

    /// Get the inner value
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request hostname, the aggregation key for per-site usage and the target
/// of domain block rules
///
/// # Examples
/// ```
/// use byteguard_core::types::Domain;
///
/// let domain = Domain::parse("  Example.COM. ").unwrap();
/// assert_eq!(domain.as_str(), "example.com");
/// assert!(Domain::parse("not a domain").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domain(String);

impl Domain {
    /// Wrap a hostname that is already normalized (for example one produced
    /// by a URL parser)
    pub fn new(host: impl Into<String>) -> Self {
        Self(host.into())
    }

    /// Parse user input into a normalized domain
    pub fn parse(input: &str) -> Result<Self> {
        let normalized = input.trim().trim_end_matches('.').to_ascii_lowercase();
        if normalized.is_empty()
            || normalized
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '/' | ':' | '?' | '#' | '@'))
        {
            return Err(ByteguardError::InvalidDomain(input.to_string()));
        }
        Ok(Self(normalized))
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Numeric id of a rule in the rule engine's dynamic table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(u32);

impl RuleId {
    /// Create a new RuleId
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the inner value
    pub const fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Usage attributed to a single open tab
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabUsage {
    /// Bytes observed for this tab
    pub total: u64,
    /// Bytes per domain for this tab
    pub domains: BTreeMap<Domain, u64>,
}

/// Daily snapshot kept in the usage history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySnapshot {
    /// Calendar day the snapshot covers
    pub date: NaiveDate,
    /// Bytes observed that day
    pub total: u64,
    /// Bytes per domain that day
    #[serde(default)]
    pub domains: BTreeMap<Domain, u64>,
}

/// Running usage counters
///
/// `total_today`, the sum of `domains` and the sum of all tab totals stay
/// equal after every [`UsageState::record`] until the first
/// [`UsageState::reset_daily`], which keeps `domains` and `hourly`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UsageState {
    /// Bytes observed since the last daily reset
    pub total_today: u64,
    /// Bytes observed this month; carried for compatibility, never incremented
    pub total_month: u64,
    /// Per-tab usage for currently open tabs
    pub tabs: BTreeMap<TabId, TabUsage>,
    /// Cumulative bytes per domain
    pub domains: BTreeMap<Domain, u64>,
    /// Bytes per local hour of day (0..=23)
    pub hourly: BTreeMap<u32, u64>,
    /// Daily snapshots
    pub history: Vec<DailySnapshot>,
}

impl UsageState {
    /// Add `bytes` for `tab`/`domain` to every counter, including the bucket
    /// for `hour`
    pub fn record(&mut self, tab: TabId, domain: &Domain, bytes: u64, hour: u32) {
        let tab_usage = self.tabs.entry(tab).or_default();
        tab_usage.total = tab_usage.total.saturating_add(bytes);
        let tab_domain = tab_usage.domains.entry(domain.clone()).or_insert(0);
        *tab_domain = tab_domain.saturating_add(bytes);

        let domain_total = self.domains.entry(domain.clone()).or_insert(0);
        *domain_total = domain_total.saturating_add(bytes);

        self.total_today = self.total_today.saturating_add(bytes);

        let bucket = self.hourly.entry(hour).or_insert(0);
        *bucket = bucket.saturating_add(bytes);
    }

    /// Forget a closed tab. Its bytes stay in the domain and daily totals.
    pub fn remove_tab(&mut self, tab: TabId) -> Option<TabUsage> {
        self.tabs.remove(&tab)
    }

    /// Start a new day: zero today's total and drop per-tab usage
    pub fn reset_daily(&mut self) {
        self.total_today = 0;
        self.tabs.clear();
    }

    /// Sum of all domain counters
    pub fn domains_total(&self) -> u64 {
        self.domains.values().sum()
    }

    /// Sum of all tab totals
    pub fn tabs_total(&self) -> u64 {
        self.tabs.values().map(|t| t.total).sum()
    }

    /// Domains ordered by bytes, largest first
    pub fn top_domains(&self, limit: usize) -> Vec<(&Domain, u64)> {
        let mut domains: Vec<_> = self.domains.iter().map(|(d, b)| (d, *b)).collect();
        domains.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        domains.truncate(limit);
        domains
    }
}

/// Display unit for budgets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataUnit {
    #[default]
    #[serde(rename = "MB")]
    Mb,
}

/// UI theme preference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

/// User-configurable budget settings
///
/// Missing fields fall back to the install defaults: 500 MiB per day,
/// 10 GiB per month, alerts at 90%.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BudgetSettings {
    /// Daily budget in bytes; zero disables budget evaluation
    pub daily_budget: u64,
    /// Monthly budget in bytes
    pub monthly_budget: u64,
    /// Alert threshold in percent, as configured by the user
    pub alert_threshold: u8,
    /// Display unit
    pub unit: DataUnit,
    /// UI theme
    pub theme: Theme,
    /// Whether budget alerts produce notifications
    pub alerts_enabled: bool,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            daily_budget: 500 * MIB,
            monthly_budget: 10 * GIB,
            alert_threshold: 90,
            unit: DataUnit::Mb,
            theme: Theme::Light,
            alerts_enabled: true,
        }
    }
}

/// Alert hysteresis state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AlertState {
    /// When the last alert fired
    pub last_alert_time: Option<DateTime<Utc>>,
    /// Usage percentage at the last alert
    pub last_alert_percentage: u8,
}

/// Severity attached to a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational (mode changes, domain blocks)
    Info,
    /// At least 80% of the daily budget
    Warning,
    /// At least 90% of the daily budget
    High,
    /// Daily budget reached or exceeded
    Exceeded,
}

impl Severity {
    /// Budget severity for a usage percentage, if any tier is reached
    pub fn for_percentage(percentage: u32) -> Option<Self> {
        match percentage {
            p if p >= 100 => Some(Self::Exceeded),
            p if p >= 90 => Some(Self::High),
            p if p >= 80 => Some(Self::Warning),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::High => write!(f, "high"),
            Self::Exceeded => write!(f, "exceeded"),
        }
    }
}

/// Persisted low-data and domain blocking state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockState {
    /// Whether low-data mode (image/media blocking) is on
    pub low_data_mode_enabled: bool,
    /// Domains blocked outright
    pub blocked_domains: BTreeSet<Domain>,
    /// Whether crossing 90% of the daily budget turns low-data mode on
    pub auto_low_data_enabled: bool,
}

impl Default for BlockState {
    fn default() -> Self {
        Self {
            low_data_mode_enabled: false,
            blocked_domains: BTreeSet::new(),
            auto_low_data_enabled: true,
        }
    }
}
