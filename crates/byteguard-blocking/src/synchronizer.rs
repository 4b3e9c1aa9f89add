//! Blocking rule synchronizer
//!
//! Owns the low-data mode flag and the blocked domain set, persists both,
//! and keeps the rule engine's dynamic table in step with them. The engine
//! table is written by nothing else.
//!
//! Failure policy differs by path: a failed engine call while switching
//! low-data mode is logged and swallowed (the flag is still persisted), while
//! a failed call while blocking or unblocking a domain is logged and returned
//! so the caller can report it.

use byteguard_core::error::Result;
use byteguard_core::notify::{Notification, Notifier};
use byteguard_core::rules::{RuleEngine, RuleUpdate};
use byteguard_core::store::{KeyValueStore, KeyValueStoreExt, keys};
use byteguard_core::types::{BlockState, Domain, RuleId, Severity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::rule_table::{DomainRuleTable, domain_rule, is_mode_rule, low_data_rules};

/// Usage percentage at which low-data mode switches itself on
pub const AUTO_ENABLE_THRESHOLD: u32 = 90;

/// Snapshot returned to callers asking for the blocking status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LowDataStatus {
    pub enabled: bool,
    pub blocked_domains: Vec<Domain>,
}

/// Why the low-data mode is being switched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModeOrigin {
    /// Startup reconciliation, never notifies
    Restore,
    /// A user action
    Explicit,
    /// The budget crossed the auto-enable threshold
    Auto,
}

struct Inner {
    state: BlockState,
    table: DomainRuleTable,
}

/// Mirrors low-data mode and domain blocks into the rule engine
pub struct BlockingRuleSynchronizer {
    store: Arc<dyn KeyValueStore>,
    engine: Arc<dyn RuleEngine>,
    notifier: Arc<dyn Notifier>,
    inner: Mutex<Inner>,
}

impl BlockingRuleSynchronizer {
    /// Create a synchronizer with default (unloaded) state; call
    /// [`init`](Self::init) before use
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        engine: Arc<dyn RuleEngine>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            engine,
            notifier,
            inner: Mutex::new(Inner {
                state: BlockState::default(),
                table: DomainRuleTable::new(),
            }),
        }
    }

    /// Load persisted state and reconcile the engine with it, silently
    ///
    /// Domain rules are rebuilt from the engine's table: blocked domains
    /// without a rule get one, rules for domains that are no longer blocked
    /// are dropped. If low-data mode was on, its rules are re-issued.
    pub async fn init(&self) -> Result<()> {
        let enabled: bool = self
            .store
            .get_value(keys::LOW_DATA_MODE)
            .await?
            .unwrap_or(false);
        let blocked: Vec<Domain> = self
            .store
            .get_value(keys::BLOCKED_DOMAINS)
            .await?
            .unwrap_or_default();
        let auto: bool = self
            .store
            .get_value(keys::AUTO_LOW_DATA)
            .await?
            .unwrap_or(true);

        let mut inner = self.inner.lock().await;
        inner.state = BlockState {
            low_data_mode_enabled: enabled,
            blocked_domains: blocked.into_iter().collect(),
            auto_low_data_enabled: auto,
        };
        debug!(
            enabled,
            blocked = inner.state.blocked_domains.len(),
            auto,
            "Loaded blocking state"
        );

        if let Err(e) = self.reconcile_domain_rules(&mut inner).await {
            warn!("Failed to reconcile domain block rules: {}", e);
        }

        if enabled {
            info!("Restoring low-data mode rules");
            self.apply_mode(&mut inner, true, ModeOrigin::Restore).await?;
        } else if let Err(e) = self.remove_stray_mode_rules().await {
            warn!("Failed to remove stale low-data mode rules: {}", e);
        }

        Ok(())
    }

    async fn mode_rule_ids(&self) -> Result<Vec<RuleId>> {
        Ok(self
            .engine
            .get_rules()
            .await?
            .into_iter()
            .map(|r| r.id)
            .filter(|id| is_mode_rule(*id))
            .collect())
    }

    async fn remove_stray_mode_rules(&self) -> Result<()> {
        let stray = self.mode_rule_ids().await?;
        if stray.is_empty() {
            return Ok(());
        }
        debug!(count = stray.len(), "Removing low-data mode rules left behind");
        self.engine.update_rules(RuleUpdate::remove(stray)).await
    }

    async fn reconcile_domain_rules(&self, inner: &mut Inner) -> Result<()> {
        let rules = self.engine.get_rules().await?;
        let (mut table, mut remove_ids) = DomainRuleTable::from_rules(&rules);

        let stale: Vec<Domain> = table
            .domains()
            .filter(|d| !inner.state.blocked_domains.contains(*d))
            .cloned()
            .collect();
        for domain in &stale {
            if let Some(id) = table.remove(domain) {
                remove_ids.push(id);
            }
        }

        let mut added = Vec::new();
        for domain in &inner.state.blocked_domains {
            if table.get(domain).is_none() {
                let id = table.allocate();
                added.push((domain.clone(), id));
            }
        }

        let update = RuleUpdate {
            remove_rule_ids: remove_ids,
            add_rules: added.iter().map(|(d, id)| domain_rule(*id, d)).collect(),
        };
        if !update.is_empty() {
            debug!(
                removed = update.remove_rule_ids.len(),
                added = update.add_rules.len(),
                "Reconciling domain block rules"
            );
            self.engine.update_rules(update).await?;
        }

        for (domain, id) in added {
            table.insert(domain, id);
        }
        inner.table = table;
        Ok(())
    }

    /// Replace the mode-range rules with the set for `enabled`
    async fn replace_mode_rules(&self, enabled: bool) -> Result<()> {
        let existing = self.mode_rule_ids().await?;
        self.engine
            .update_rules(RuleUpdate {
                remove_rule_ids: existing,
                add_rules: if enabled { low_data_rules() } else { Vec::new() },
            })
            .await
    }

    async fn apply_mode(&self, inner: &mut Inner, enabled: bool, origin: ModeOrigin) -> Result<()> {
        inner.state.low_data_mode_enabled = enabled;
        self.store.set_value(keys::LOW_DATA_MODE, &enabled).await?;

        if let Err(e) = self.replace_mode_rules(enabled).await {
            warn!(enabled, "Failed to update low-data mode rules: {}", e);
            return Ok(());
        }

        info!(enabled, ?origin, "Low-data mode rules applied");
        let notification = match (origin, enabled) {
            (ModeOrigin::Restore, _) => None,
            (ModeOrigin::Explicit, true) => Some(Notification::new(
                "Low-Data Mode Enabled",
                "Images and videos are now blocked to save bandwidth.",
                Severity::Info,
            )),
            (ModeOrigin::Explicit, false) => Some(Notification::new(
                "Low-Data Mode Disabled",
                "All content is now loading normally.",
                Severity::Info,
            )),
            (ModeOrigin::Auto, _) => Some(Notification::new(
                "Auto Low-Data Mode Activated",
                format!(
                    "You've reached {AUTO_ENABLE_THRESHOLD}% of your budget. Low-data mode is now ON."
                ),
                Severity::High,
            )),
        };
        if let Some(notification) = notification {
            self.notifier.notify(notification);
        }
        Ok(())
    }

    /// Turn low-data mode on, re-issuing its rules even if already on
    pub async fn enable_low_data_mode(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.apply_mode(&mut inner, true, ModeOrigin::Explicit).await
    }

    /// Turn low-data mode off, removing its rules even if already off
    pub async fn disable_low_data_mode(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.apply_mode(&mut inner, false, ModeOrigin::Explicit).await
    }

    /// Flip low-data mode, returning the new state
    pub async fn toggle(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let enabled = !inner.state.low_data_mode_enabled;
        self.apply_mode(&mut inner, enabled, ModeOrigin::Explicit).await?;
        Ok(enabled)
    }

    /// Switch low-data mode on when usage reached the auto-enable threshold,
    /// auto mode is allowed and the mode is off. Returns whether it switched.
    pub async fn check_auto_enable(&self, percentage: u32) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if percentage < AUTO_ENABLE_THRESHOLD
            || !inner.state.auto_low_data_enabled
            || inner.state.low_data_mode_enabled
        {
            return Ok(false);
        }

        info!(percentage, "Budget threshold reached, enabling low-data mode");
        self.apply_mode(&mut inner, true, ModeOrigin::Auto).await?;
        Ok(true)
    }

    /// Allow or forbid automatic low-data mode
    pub async fn set_auto_low_data(&self, enabled: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.store.set_value(keys::AUTO_LOW_DATA, &enabled).await?;
        inner.state.auto_low_data_enabled = enabled;
        Ok(())
    }

    /// Block all loads from `domain` with a single additive rule
    pub async fn block_domain(&self, domain: &Domain) -> Result<()> {
        let mut inner = self.inner.lock().await;

        if inner.table.get(domain).is_none() {
            let id = inner.table.allocate();
            if let Err(e) = self
                .engine
                .update_rules(RuleUpdate::add(vec![domain_rule(id, domain)]))
                .await
            {
                warn!(%domain, "Failed to block domain: {}", e);
                return Err(e);
            }
            inner.table.insert(domain.clone(), id);
        }

        if inner.state.blocked_domains.insert(domain.clone()) {
            self.persist_blocked(&inner.state).await?;
            info!(%domain, "Blocked domain");
            self.notifier.notify(Notification::new(
                "Domain Blocked",
                format!("{domain} is now blocked."),
                Severity::Info,
            ));
        }
        Ok(())
    }

    /// Lift the block on `domain`, removing only its rule
    pub async fn unblock_domain(&self, domain: &Domain) -> Result<()> {
        let mut inner = self.inner.lock().await;

        if let Some(id) = inner.table.get(domain) {
            if let Err(e) = self.engine.update_rules(RuleUpdate::remove(vec![id])).await {
                warn!(%domain, "Failed to unblock domain: {}", e);
                return Err(e);
            }
            inner.table.remove(domain);
        }

        if inner.state.blocked_domains.remove(domain) {
            self.persist_blocked(&inner.state).await?;
            info!(%domain, "Unblocked domain");
            self.notifier.notify(Notification::new(
                "Domain Unblocked",
                format!("{domain} is now allowed."),
                Severity::Info,
            ));
        }
        Ok(())
    }

    async fn persist_blocked(&self, state: &BlockState) -> Result<()> {
        let domains: Vec<&Domain> = state.blocked_domains.iter().collect();
        self.store.set_value(keys::BLOCKED_DOMAINS, &domains).await
    }

    /// Whether low-data mode is on
    pub async fn is_enabled(&self) -> bool {
        self.inner.lock().await.state.low_data_mode_enabled
    }

    /// Mode flag and blocked domains
    pub async fn status(&self) -> LowDataStatus {
        let inner = self.inner.lock().await;
        LowDataStatus {
            enabled: inner.state.low_data_mode_enabled,
            blocked_domains: inner.state.blocked_domains.iter().cloned().collect(),
        }
    }

    /// Copy of the full blocking state
    pub async fn block_state(&self) -> BlockState {
        self.inner.lock().await.state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule_table::{IMAGE_RULE_ID, MEDIA_RULE_ID};
    use byteguard_core::ByteguardError;
    use byteguard_core::notify::RecordingNotifier;
    use byteguard_core::rules::InMemoryRuleEngine;
    use byteguard_core::store::MemoryStore;

    struct Harness {
        store: Arc<MemoryStore>,
        engine: Arc<InMemoryRuleEngine>,
        notifier: Arc<RecordingNotifier>,
        sync: BlockingRuleSynchronizer,
    }

    fn harness_with(store: MemoryStore, engine: InMemoryRuleEngine) -> Harness {
        let store = Arc::new(store);
        let engine = Arc::new(engine);
        let notifier = Arc::new(RecordingNotifier::new());
        let sync = BlockingRuleSynchronizer::new(store.clone(), engine.clone(), notifier.clone());
        Harness {
            store,
            engine,
            notifier,
            sync,
        }
    }

    async fn harness() -> Harness {
        let h = harness_with(MemoryStore::new(), InMemoryRuleEngine::new());
        h.sync.init().await.unwrap();
        h
    }

    fn domain(s: &str) -> Domain {
        Domain::new(s)
    }

    async fn rule_ids(engine: &InMemoryRuleEngine) -> Vec<u32> {
        engine
            .get_rules()
            .await
            .unwrap()
            .iter()
            .map(|r| r.id.get())
            .collect()
    }

    #[tokio::test]
    async fn test_enable_and_disable() {
        let h = harness().await;

        h.sync.enable_low_data_mode().await.unwrap();
        assert!(h.sync.is_enabled().await);
        assert_eq!(rule_ids(&h.engine).await, vec![1001, 1002]);
        assert_eq!(
            h.store.get_value::<bool>(keys::LOW_DATA_MODE).await.unwrap(),
            Some(true)
        );

        h.sync.disable_low_data_mode().await.unwrap();
        assert!(!h.sync.is_enabled().await);
        assert!(rule_ids(&h.engine).await.is_empty());

        let titles: Vec<String> = h.notifier.notifications().into_iter().map(|n| n.title).collect();
        assert_eq!(titles, vec!["Low-Data Mode Enabled", "Low-Data Mode Disabled"]);
    }

    #[tokio::test]
    async fn test_enable_twice_reissues_rules() {
        let h = harness().await;
        h.sync.enable_low_data_mode().await.unwrap();
        h.sync.enable_low_data_mode().await.unwrap();

        let log = h.engine.update_log().await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].remove_rule_ids, vec![IMAGE_RULE_ID, MEDIA_RULE_ID]);
        assert_eq!(log[1].add_rules.len(), 2);
        assert_eq!(rule_ids(&h.engine).await, vec![1001, 1002]);
    }

    #[tokio::test]
    async fn test_toggle_returns_new_state() {
        let h = harness().await;
        assert!(h.sync.toggle().await.unwrap());
        assert!(!h.sync.toggle().await.unwrap());
        assert!(h.sync.toggle().await.unwrap());
    }

    #[tokio::test]
    async fn test_mode_change_keeps_domain_rules() {
        let h = harness().await;
        h.sync.block_domain(&domain("video.example")).await.unwrap();
        h.sync.enable_low_data_mode().await.unwrap();
        h.sync.disable_low_data_mode().await.unwrap();
        assert_eq!(rule_ids(&h.engine).await, vec![1101]);
    }

    #[tokio::test]
    async fn test_mode_engine_failure_is_swallowed() {
        let h = harness().await;
        h.engine.set_fail_updates(true);

        h.sync.enable_low_data_mode().await.unwrap();
        assert!(h.sync.is_enabled().await);
        assert_eq!(
            h.store.get_value::<bool>(keys::LOW_DATA_MODE).await.unwrap(),
            Some(true)
        );
        assert!(h.notifier.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_block_domain_adds_single_rule() {
        let h = harness().await;
        h.sync.block_domain(&domain("example.com")).await.unwrap();
        h.sync.block_domain(&domain("ads.example")).await.unwrap();

        let log = h.engine.update_log().await;
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|u| u.remove_rule_ids.is_empty() && u.add_rules.len() == 1));

        let status = h.sync.status().await;
        assert_eq!(
            status.blocked_domains,
            vec![domain("ads.example"), domain("example.com")]
        );
        assert_eq!(
            h.store
                .get_value::<Vec<String>>(keys::BLOCKED_DOMAINS)
                .await
                .unwrap()
                .unwrap(),
            vec!["ads.example", "example.com"]
        );
    }

    #[tokio::test]
    async fn test_block_domain_twice_is_noop() {
        let h = harness().await;
        h.sync.block_domain(&domain("example.com")).await.unwrap();
        h.sync.block_domain(&domain("example.com")).await.unwrap();
        assert_eq!(h.engine.update_log().await.len(), 1);
        assert_eq!(h.notifier.notifications().len(), 1);
    }

    #[tokio::test]
    async fn test_unblock_removes_only_that_rule() {
        let h = harness().await;
        for d in ["a.com", "b.com", "c.com"] {
            h.sync.block_domain(&domain(d)).await.unwrap();
        }
        h.engine.clear_log().await;

        h.sync.unblock_domain(&domain("b.com")).await.unwrap();

        let log = h.engine.update_log().await;
        assert_eq!(log, vec![RuleUpdate::remove(vec![RuleId::new(1102)])]);
        assert_eq!(rule_ids(&h.engine).await, vec![1101, 1103]);
        assert_eq!(
            h.sync.status().await.blocked_domains,
            vec![domain("a.com"), domain("c.com")]
        );

        // A later block gets a fresh id
        h.sync.block_domain(&domain("d.com")).await.unwrap();
        assert_eq!(rule_ids(&h.engine).await, vec![1101, 1103, 1104]);
    }

    #[tokio::test]
    async fn test_unblock_unknown_domain_is_noop() {
        let h = harness().await;
        h.sync.unblock_domain(&domain("never.com")).await.unwrap();
        assert!(h.engine.update_log().await.is_empty());
        assert!(h.notifier.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_domain_engine_failure_is_returned() {
        let h = harness().await;
        h.engine.set_fail_updates(true);

        let result = h.sync.block_domain(&domain("example.com")).await;
        assert!(matches!(result, Err(ByteguardError::RuleEngine(_))));
        assert!(h.sync.status().await.blocked_domains.is_empty());

        h.engine.set_fail_updates(false);
        h.sync.block_domain(&domain("example.com")).await.unwrap();
        h.engine.set_fail_updates(true);
        let result = h.sync.unblock_domain(&domain("example.com")).await;
        assert!(result.is_err());
        assert_eq!(h.sync.status().await.blocked_domains, vec![domain("example.com")]);
    }

    #[tokio::test]
    async fn test_auto_enable_guards() {
        let h = harness().await;
        assert!(!h.sync.check_auto_enable(89).await.unwrap());
        assert!(h.sync.check_auto_enable(90).await.unwrap());
        assert!(h.sync.is_enabled().await);
        // Already on
        assert!(!h.sync.check_auto_enable(120).await.unwrap());

        let auto = h.notifier.with_severity(Severity::High);
        assert_eq!(auto.len(), 1);
        assert_eq!(auto[0].title, "Auto Low-Data Mode Activated");
    }

    #[tokio::test]
    async fn test_auto_enable_respects_preference() {
        let h = harness().await;
        h.sync.set_auto_low_data(false).await.unwrap();
        assert!(!h.sync.check_auto_enable(100).await.unwrap());
        assert!(!h.sync.is_enabled().await);
        assert_eq!(
            h.store.get_value::<bool>(keys::AUTO_LOW_DATA).await.unwrap(),
            Some(false)
        );
    }

    #[tokio::test]
    async fn test_init_restores_mode_silently() {
        let store = MemoryStore::new();
        store.set_value(keys::LOW_DATA_MODE, &true).await.unwrap();
        let h = harness_with(store, InMemoryRuleEngine::new());

        h.sync.init().await.unwrap();

        assert!(h.sync.is_enabled().await);
        assert_eq!(rule_ids(&h.engine).await, vec![1001, 1002]);
        assert!(h.notifier.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_init_reconciles_domain_rules() {
        let store = MemoryStore::new();
        store
            .set_value(keys::BLOCKED_DOMAINS, &vec!["keep.com", "missing.com"])
            .await
            .unwrap();
        let engine = InMemoryRuleEngine::with_rules(vec![
            domain_rule(RuleId::new(1101), &domain("keep.com")),
            domain_rule(RuleId::new(1102), &domain("stale.com")),
        ]);
        let h = harness_with(store, engine);

        h.sync.init().await.unwrap();

        let rules = h.engine.get_rules().await.unwrap();
        let mapped: Vec<(u32, String)> = rules
            .iter()
            .map(|r| {
                (
                    r.id.get(),
                    r.condition.request_domains.as_ref().unwrap()[0].to_string(),
                )
            })
            .collect();
        assert_eq!(
            mapped,
            vec![(1101, "keep.com".to_string()), (1103, "missing.com".to_string())]
        );
        assert!(h.notifier.notifications().is_empty());

        // The rebuilt table is content-addressed
        h.sync.unblock_domain(&domain("keep.com")).await.unwrap();
        assert_eq!(rule_ids(&h.engine).await, vec![1103]);
    }

    #[tokio::test]
    async fn test_init_removes_mode_rules_when_disabled() {
        let h = harness_with(
            MemoryStore::new(),
            InMemoryRuleEngine::with_rules(low_data_rules()),
        );
        h.sync.init().await.unwrap();
        assert!(rule_ids(&h.engine).await.is_empty());
        assert!(!h.sync.is_enabled().await);
    }

    #[tokio::test]
    async fn test_init_defaults_auto_low_data_on() {
        let h = harness().await;
        let state = h.sync.block_state().await;
        assert!(state.auto_low_data_enabled);
        assert!(!state.low_data_mode_enabled);
    }
}
