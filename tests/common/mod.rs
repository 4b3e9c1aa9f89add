//! Common test utilities and helpers for byteguard tests
//!
//! This module wires a [`BandwidthTracker`] to in-memory collaborators and
//! provides builders for the events the tracker consumes.

use byteguard::{
    clock::ManualClock,
    notify::{Notification, RecordingNotifier},
    rules::InMemoryRuleEngine,
    store::{MemoryStore, StoreMap},
    timezone::TimezoneConfig,
    tracker::{BandwidthTracker, HttpHeader, RequestEvent, TabClosedEvent},
    types::BudgetSettings,
};
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

/// Instant all harness clocks start at
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 2, 9, 0, 0).unwrap()
}

/// A tracker over in-memory collaborators, plus handles to inspect them
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub engine: Arc<InMemoryRuleEngine>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
    pub tracker: Arc<BandwidthTracker>,
}

impl Harness {
    /// Start a tracker on an empty store
    pub async fn new() -> Self {
        Self::with_parts(MemoryStore::new(), InMemoryRuleEngine::new()).await
    }

    /// Start a tracker with a daily budget of `daily` bytes
    pub async fn with_budget(daily: u64) -> Self {
        let harness = Self::new().await;
        harness.set_budget(daily).await;
        harness.notifier.clear();
        harness
    }

    /// Start a tracker over pre-populated collaborators
    pub async fn with_parts(store: MemoryStore, engine: InMemoryRuleEngine) -> Self {
        let store = Arc::new(store);
        let engine = Arc::new(engine);
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let tracker = BandwidthTracker::start(
            store.clone(),
            engine.clone(),
            notifier.clone(),
            clock.clone(),
            TimezoneConfig::new(Tz::UTC),
        )
        .await
        .unwrap();

        Self {
            store,
            engine,
            notifier,
            clock,
            tracker: Arc::new(tracker),
        }
    }

    /// Replace the daily budget, keeping other settings
    pub async fn set_budget(&self, daily: u64) {
        let settings = BudgetSettings {
            daily_budget: daily,
            ..self.tracker.settings().load().await.unwrap()
        };
        self.tracker.settings().save(&settings).await.unwrap();
    }

    /// Budget alerts sent so far
    pub fn alerts(&self) -> Vec<Notification> {
        self.notifier
            .notifications()
            .into_iter()
            .filter(|n| n.title == "Data Budget Alert")
            .collect()
    }

    /// Ids of the rules currently in the engine
    #[allow(dead_code)]
    pub async fn rule_ids(&self) -> Vec<u32> {
        use byteguard::rules::RuleEngine;
        self.engine
            .get_rules()
            .await
            .unwrap()
            .iter()
            .map(|r| r.id.get())
            .collect()
    }
}

/// A completed request carrying `bytes` in its content-length header
pub fn request(tab_id: i64, url: &str, bytes: u64) -> RequestEvent {
    RequestEvent {
        tab_id,
        url: Some(url.to_string()),
        response_headers: Some(vec![HttpHeader::new("Content-Length", bytes.to_string())]),
        from_cache: false,
    }
}

/// A closed tab
#[allow(dead_code)]
pub fn tab_closed(tab_id: i64) -> TabClosedEvent {
    TabClosedEvent { tab_id }
}

/// A store holding `pairs`
#[allow(dead_code)]
pub fn store_with(pairs: &[(&str, serde_json::Value)]) -> MemoryStore {
    let mut data = StoreMap::new();
    for (key, value) in pairs {
        data.insert(key.to_string(), value.clone());
    }
    MemoryStore::with_data(data)
}
