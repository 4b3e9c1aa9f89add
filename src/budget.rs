//! Budget evaluation with hysteresis
//!
//! An alert fires when usage crosses into a new tier (80%, 90%, 100%) or,
//! once at 90% or above, when the last alert is more than 30 minutes old.
//! Sub-tier growth inside the cooldown stays silent.

use byteguard_core::byte_format::format_bytes;
use byteguard_core::clock::Clock;
use byteguard_core::error::Result;
use byteguard_core::notify::{Notification, Notifier};
use byteguard_core::store::{KeyValueStore, KeyValueStoreExt, StoreMap, keys};
use byteguard_core::types::{AlertState, BudgetSettings, Severity};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Tier boundaries, in percent of the daily budget
pub const ALERT_TIERS: [u32; 3] = [80, 90, 100];

/// Percentage from which the cooldown re-alert applies
pub const REPEAT_ALERT_PERCENTAGE: u32 = 90;

/// Minutes after which an alert may repeat without a new tier crossing
pub const REPEAT_ALERT_MINUTES: i64 = 30;

/// Outcome of a budget check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDecision {
    /// No daily budget configured
    Skipped,
    /// Evaluated, nothing to report
    Quiet { percentage: u32 },
    /// An alert fired
    Alert { percentage: u32, severity: Severity },
}

impl AlertDecision {
    /// Percentage of the daily budget, when evaluated
    pub fn percentage(&self) -> Option<u32> {
        match self {
            Self::Skipped => None,
            Self::Quiet { percentage } | Self::Alert { percentage, .. } => Some(*percentage),
        }
    }

    /// Whether an alert fired
    pub fn fired(&self) -> bool {
        matches!(self, Self::Alert { .. })
    }
}

/// Whole percent of `budget` used by `total`, rounded down
///
/// Returns `None` for a zero budget.
///
/// # Examples
/// ```
/// use byteguard::budget::usage_percentage;
///
/// assert_eq!(usage_percentage(899, 1000), Some(89));
/// assert_eq!(usage_percentage(2500, 1000), Some(250));
/// assert_eq!(usage_percentage(10, 0), None);
/// ```
pub fn usage_percentage(total: u64, budget: u64) -> Option<u32> {
    if budget == 0 {
        return None;
    }
    let percentage = u128::from(total) * 100 / u128::from(budget);
    Some(u32::try_from(percentage).unwrap_or(u32::MAX))
}

/// Whether an alert should fire at `percentage` given the previous alert
pub fn should_alert(percentage: u32, previous: &AlertState, now: DateTime<Utc>) -> bool {
    let last = u32::from(previous.last_alert_percentage);
    let crossed_tier = ALERT_TIERS
        .iter()
        .any(|&tier| percentage >= tier && last < tier);

    let cooled_down = match previous.last_alert_time {
        Some(at) => now - at > Duration::minutes(REPEAT_ALERT_MINUTES),
        None => true,
    };

    crossed_tier || (cooled_down && percentage >= REPEAT_ALERT_PERCENTAGE)
}

/// Decides when to alert and remembers the last alert
pub struct BudgetEvaluator {
    store: Arc<dyn KeyValueStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    state: Mutex<AlertState>,
}

impl BudgetEvaluator {
    /// Create an evaluator with no alert history
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_state(store, notifier, clock, AlertState::default())
    }

    fn with_state(
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        state: AlertState,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            state: Mutex::new(state),
        }
    }

    /// Create an evaluator with the alert state persisted in `store`
    ///
    /// `lastAlertTime` is kept as epoch milliseconds.
    pub async fn load(
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let millis: Option<i64> = store.get_value(keys::LAST_ALERT_TIME).await?;
        let percentage: Option<u8> = store.get_value(keys::LAST_ALERT_PERCENTAGE).await?;
        let state = AlertState {
            last_alert_time: millis.and_then(DateTime::from_timestamp_millis),
            last_alert_percentage: percentage.unwrap_or(0),
        };
        debug!(?state, "Loaded alert state");
        Ok(Self::with_state(store, notifier, clock, state))
    }

    /// Current alert state
    pub async fn alert_state(&self) -> AlertState {
        *self.state.lock().await
    }

    /// Forget the previous day's alert tier so every tier alerts again
    ///
    /// The last alert time is kept, so the repeat cooldown still applies.
    pub async fn reset_daily(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.store.set_value(keys::LAST_ALERT_PERCENTAGE, &0u8).await?;
        state.last_alert_percentage = 0;
        debug!("Alert tier reset for the new day");
        Ok(())
    }

    /// Evaluate `total_today` against the daily budget
    ///
    /// On a fire the alert state is persisted and, when alerts are enabled,
    /// a notification is sent. Auto low-data handling is left to the caller.
    pub async fn check(
        &self,
        total_today: u64,
        settings: &BudgetSettings,
    ) -> Result<AlertDecision> {
        let Some(percentage) = usage_percentage(total_today, settings.daily_budget) else {
            return Ok(AlertDecision::Skipped);
        };

        let now = self.clock.now();
        let mut state = self.state.lock().await;
        if !should_alert(percentage, &state, now) {
            return Ok(AlertDecision::Quiet { percentage });
        }

        let severity = Severity::for_percentage(percentage).unwrap_or(Severity::High);
        info!(percentage, %severity, "Budget alert");

        if settings.alerts_enabled {
            self.notifier.notify(Notification::new(
                "Data Budget Alert",
                format!(
                    "You've used {} of your {} daily budget!",
                    format_bytes(total_today, 2),
                    format_bytes(settings.daily_budget, 2)
                ),
                severity,
            ));
        }

        let next = AlertState {
            last_alert_time: Some(now),
            last_alert_percentage: u8::try_from(percentage).unwrap_or(u8::MAX),
        };
        let mut items = StoreMap::new();
        items.insert(
            keys::LAST_ALERT_TIME.to_string(),
            Value::from(now.timestamp_millis()),
        );
        items.insert(
            keys::LAST_ALERT_PERCENTAGE.to_string(),
            Value::from(next.last_alert_percentage),
        );
        *state = next;
        self.store.set(items).await?;

        Ok(AlertDecision::Alert {
            percentage,
            severity,
        })
    }
}
