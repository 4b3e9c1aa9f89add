//! Usage ledger
//!
//! Owns the running usage counters. Every mutation updates the in-memory
//! state under a single lock and hands a snapshot to the coalescing writer,
//! so callers never wait on the store.

use byteguard_core::clock::Clock;
use byteguard_core::error::Result;
use byteguard_core::store::{KeyValueStore, KeyValueStoreExt, keys};
use byteguard_core::timezone::TimezoneConfig;
use byteguard_core::types::{Domain, TabId, UsageState};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::persistence::CoalescingWriter;

/// Running usage counters with debounced persistence
pub struct UsageLedger {
    state: Mutex<UsageState>,
    writer: CoalescingWriter,
    clock: Arc<dyn Clock>,
    timezone: TimezoneConfig,
}

impl UsageLedger {
    /// Create an empty ledger persisting to `store`
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        timezone: TimezoneConfig,
    ) -> Self {
        Self::with_writer(
            CoalescingWriter::new(store, keys::USAGE),
            clock,
            timezone,
            UsageState::default(),
        )
    }

    /// Create a ledger from its parts
    pub fn with_writer(
        writer: CoalescingWriter,
        clock: Arc<dyn Clock>,
        timezone: TimezoneConfig,
        state: UsageState,
    ) -> Self {
        Self {
            state: Mutex::new(state),
            writer,
            clock,
            timezone,
        }
    }

    /// Restore the ledger from `store`; a missing entry yields empty counters
    pub async fn load(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        timezone: TimezoneConfig,
    ) -> Result<Self> {
        let state: UsageState = store.get_value(keys::USAGE).await?.unwrap_or_default();
        debug!(
            total_today = state.total_today,
            tabs = state.tabs.len(),
            domains = state.domains.len(),
            "Loaded usage state"
        );
        Ok(Self::with_writer(
            CoalescingWriter::new(store, keys::USAGE),
            clock,
            timezone,
            state,
        ))
    }

    /// Add `bytes` for `tab`/`domain`, returning the new daily total
    ///
    /// Entries are created on first sight, so a zero-byte record still makes
    /// the tab and domain visible.
    pub async fn record(&self, tab: TabId, domain: &Domain, bytes: u64) -> Result<u64> {
        let hour = self.timezone.local_hour(self.clock.now());
        let mut state = self.state.lock().await;
        state.record(tab, domain, bytes, hour);
        self.writer.schedule(&*state)?;
        Ok(state.total_today)
    }

    /// Forget a closed tab, returning whether it had an entry
    pub async fn cleanup_tab(&self, tab: TabId) -> Result<bool> {
        let mut state = self.state.lock().await;
        let removed = state.remove_tab(tab).is_some();
        self.writer.schedule(&*state)?;
        Ok(removed)
    }

    /// Zero today's total and drop per-tab usage
    pub async fn reset_daily(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        debug!(total_today = state.total_today, "Resetting daily usage");
        state.reset_daily();
        self.writer.schedule(&*state)?;
        Ok(())
    }

    /// Copy of the current counters
    pub async fn snapshot(&self) -> UsageState {
        self.state.lock().await.clone()
    }

    /// Today's total
    pub async fn total_today(&self) -> u64 {
        self.state.lock().await.total_today
    }

    /// Write any pending snapshot now
    pub async fn flush(&self) -> Result<()> {
        self.writer.flush().await
    }

    /// Flush and stop the write timer
    pub async fn shutdown(&self) -> Result<()> {
        let result = self.writer.flush().await;
        self.writer.shutdown();
        result
    }

    /// Timezone used for hourly buckets
    pub fn timezone(&self) -> &TimezoneConfig {
        &self.timezone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteguard_core::clock::ManualClock;
    use byteguard_core::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use chrono_tz::Tz;
    use std::time::Duration;

    fn ledger(store: &Arc<MemoryStore>) -> UsageLedger {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 10, 14, 20, 0).unwrap(),
        ));
        UsageLedger::new(store.clone(), clock, TimezoneConfig::new(Tz::Asia__Tokyo))
    }

    fn domain(s: &str) -> Domain {
        Domain::new(s)
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_buckets_by_local_hour() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger(&store);

        assert_eq!(ledger.record(TabId::new(1), &domain("a.com"), 300).await.unwrap(), 300);
        assert_eq!(ledger.record(TabId::new(2), &domain("a.com"), 200).await.unwrap(), 500);

        let state = ledger.snapshot().await;
        // 14:20 UTC is 23:20 in Tokyo
        assert_eq!(state.hourly[&23], 500);
        assert_eq!(state.domains[&domain("a.com")], 500);
        assert_eq!(state.tabs.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutations_are_coalesced() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger(&store);

        for _ in 0..20 {
            ledger.record(TabId::new(1), &domain("a.com"), 10).await.unwrap();
        }
        ledger.cleanup_tab(TabId::new(1)).await.unwrap();
        assert_eq!(store.write_count(), 0);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(store.write_count(), 1);

        let stored: UsageState = store.get_value(keys::USAGE).await.unwrap().unwrap();
        assert_eq!(stored.total_today, 200);
        assert!(stored.tabs.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_unknown_tab() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger(&store);
        assert!(!ledger.cleanup_tab(TabId::new(9)).await.unwrap());
    }

    #[tokio::test]
    async fn test_load_and_flush_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ledger = UsageLedger::load(store.clone(), clock.clone(), TimezoneConfig::new(Tz::UTC))
            .await
            .unwrap();
        ledger.record(TabId::new(4), &domain("b.org"), 42).await.unwrap();
        ledger.reset_daily().await.unwrap();
        ledger.shutdown().await.unwrap();

        let reloaded = UsageLedger::load(store, clock, TimezoneConfig::new(Tz::UTC))
            .await
            .unwrap();
        let state = reloaded.snapshot().await;
        assert_eq!(state.total_today, 0);
        assert_eq!(state.domains[&domain("b.org")], 42);
        assert!(state.tabs.is_empty());
    }
}
