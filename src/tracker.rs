//! Event intake and the usage → budget → blocking pipeline
//!
//! [`BandwidthTracker`] wires the ledger, the budget evaluator and the
//! blocking synchronizer together behind the two event handlers a host feeds:
//! a completed request and a closed tab.

use byteguard_blocking::BlockingRuleSynchronizer;
use byteguard_core::clock::Clock;
use byteguard_core::error::Result;
use byteguard_core::notify::Notifier;
use byteguard_core::rules::RuleEngine;
use byteguard_core::store::KeyValueStore;
use byteguard_core::timezone::TimezoneConfig;
use byteguard_core::types::{Domain, TabId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::budget::{AlertDecision, BudgetEvaluator};
use crate::ledger::UsageLedger;
use crate::settings::SettingsStore;

/// A response header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeader {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl HttpHeader {
    /// Create a header
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

/// A completed network request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEvent {
    /// Tab the request belongs to; negative for requests outside any tab
    pub tab_id: i64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub response_headers: Option<Vec<HttpHeader>>,
    #[serde(default)]
    pub from_cache: bool,
}

/// A closed tab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabClosedEvent {
    pub tab_id: i64,
}

/// Any event the tracker consumes, tagged by `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TrackerEvent {
    RequestCompleted(RequestEvent),
    TabRemoved(TabClosedEvent),
}

/// Bytes to attribute to a response
///
/// Uses the `content-length` header (any case). Cached responses, missing
/// headers and unparsable values count as zero.
///
/// # Examples
/// ```
/// use byteguard::tracker::{HttpHeader, size_of};
///
/// let headers = vec![HttpHeader::new("Content-Length", "2048")];
/// assert_eq!(size_of(Some(headers.as_slice()), false), 2048);
/// assert_eq!(size_of(Some(headers.as_slice()), true), 0);
/// assert_eq!(size_of(None, false), 0);
/// ```
pub fn size_of(headers: Option<&[HttpHeader]>, from_cache: bool) -> u64 {
    if from_cache {
        return 0;
    }
    headers
        .into_iter()
        .flatten()
        .find(|h| h.name.eq_ignore_ascii_case("content-length"))
        .and_then(|h| h.value.as_deref())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0)
}

/// Hostname of a request URL
pub fn request_domain(url: &str) -> Option<Domain> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    if host.is_empty() {
        return None;
    }
    Some(Domain::new(host.to_ascii_lowercase()))
}

/// The accounting pipeline
pub struct BandwidthTracker {
    ledger: UsageLedger,
    evaluator: BudgetEvaluator,
    blocking: BlockingRuleSynchronizer,
    settings: SettingsStore,
}

impl BandwidthTracker {
    /// Assemble a tracker from ready components
    pub fn new(
        ledger: UsageLedger,
        evaluator: BudgetEvaluator,
        blocking: BlockingRuleSynchronizer,
        settings: SettingsStore,
    ) -> Self {
        Self {
            ledger,
            evaluator,
            blocking,
            settings,
        }
    }

    /// Load every component from `store` and reconcile the rule engine
    ///
    /// Writes install defaults when the store has never been used.
    pub async fn start(
        store: Arc<dyn KeyValueStore>,
        engine: Arc<dyn RuleEngine>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        timezone: TimezoneConfig,
    ) -> Result<Self> {
        let settings = SettingsStore::new(store.clone());
        settings.initialize(notifier.as_ref()).await?;

        let ledger = UsageLedger::load(store.clone(), clock.clone(), timezone).await?;
        let evaluator = BudgetEvaluator::load(store.clone(), notifier.clone(), clock).await?;
        let blocking = BlockingRuleSynchronizer::new(store, engine, notifier);
        blocking.init().await?;

        Ok(Self::new(ledger, evaluator, blocking, settings))
    }

    /// Handle a completed request
    ///
    /// Returns `None` when the event is dropped (no tab, no usable URL).
    pub async fn process_request(&self, event: &RequestEvent) -> Result<Option<AlertDecision>> {
        let Some(tab) = TabId::from_raw(event.tab_id) else {
            debug!(tab_id = event.tab_id, "Ignoring request outside a tab");
            return Ok(None);
        };
        let Some(domain) = event.url.as_deref().and_then(request_domain) else {
            debug!(url = ?event.url, "Ignoring request without a usable URL");
            return Ok(None);
        };

        let bytes = size_of(event.response_headers.as_deref(), event.from_cache);
        self.update_usage(tab, &domain, bytes).await.map(Some)
    }

    /// Handle a closed tab
    pub async fn process_tab_closed(&self, event: &TabClosedEvent) -> Result<()> {
        match TabId::from_raw(event.tab_id) {
            Some(tab) => self.ledger.cleanup_tab(tab).await.map(|_| ()),
            None => Ok(()),
        }
    }

    /// Dispatch any tracker event
    pub async fn process_event(&self, event: &TrackerEvent) -> Result<()> {
        match event {
            TrackerEvent::RequestCompleted(request) => {
                self.process_request(request).await.map(|_| ())
            }
            TrackerEvent::TabRemoved(closed) => self.process_tab_closed(closed).await,
        }
    }

    /// Record usage, check the budget and, on an alert, consider switching
    /// low-data mode on
    pub async fn update_usage(
        &self,
        tab: TabId,
        domain: &Domain,
        bytes: u64,
    ) -> Result<AlertDecision> {
        let total_today = self.ledger.record(tab, domain, bytes).await?;
        let settings = self.settings.load().await?;
        let decision = self.evaluator.check(total_today, &settings).await?;

        if let AlertDecision::Alert { percentage, .. } = decision {
            self.blocking.check_auto_enable(percentage).await?;
        }
        Ok(decision)
    }

    /// Start a new accounting day
    ///
    /// Zeroes today's usage and re-arms every budget alert tier.
    pub async fn reset_daily(&self) -> Result<()> {
        self.ledger.reset_daily().await?;
        self.evaluator.reset_daily().await
    }

    /// The usage ledger
    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    /// The budget evaluator
    pub fn evaluator(&self) -> &BudgetEvaluator {
        &self.evaluator
    }

    /// The blocking synchronizer
    pub fn blocking(&self) -> &BlockingRuleSynchronizer {
        &self.blocking
    }

    /// The settings store
    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Flush pending usage and stop background writes
    pub async fn shutdown(&self) -> Result<()> {
        self.ledger.shutdown().await
    }
}
