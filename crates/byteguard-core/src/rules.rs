//! Declarative rule engine collaborator
//!
//! The rule engine holds a table of block rules keyed by numeric id and
//! evaluates them per request without custom code. It has no upsert and no
//! removal by content: callers remove by id and add whole rules, both in one
//! [`RuleUpdate`] where removals are applied before additions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::error::{ByteguardError, Result};
use crate::store::{KeyValueStore, KeyValueStoreExt};
use crate::types::{Domain, RuleId};

/// Kind of resource a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    Stylesheet,
    Script,
    Image,
    Media,
}

/// What a matching rule does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleActionType {
    Block,
}

/// Rule action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub action_type: RuleActionType,
}

impl RuleAction {
    /// Block the request
    pub fn block() -> Self {
        Self {
            action_type: RuleActionType::Block,
        }
    }
}

/// Conditions a request must meet for the rule to apply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    /// URL pattern, `*` for every URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_filter: Option<String>,
    /// Request hostnames the rule matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_domains: Option<Vec<Domain>>,
    /// Resource types the rule matches
    #[serde(default)]
    pub resource_types: Vec<ResourceType>,
    /// Initiator domains exempt from the rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded_domains: Option<Vec<String>>,
}

/// A dynamic block rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RuleCondition,
}

/// One atomic change to the rule table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpdate {
    /// Ids to remove; unknown ids are ignored
    #[serde(default)]
    pub remove_rule_ids: Vec<RuleId>,
    /// Rules to add after the removals
    #[serde(default)]
    pub add_rules: Vec<Rule>,
}

impl RuleUpdate {
    /// An update that only adds
    pub fn add(rules: Vec<Rule>) -> Self {
        Self {
            remove_rule_ids: Vec::new(),
            add_rules: rules,
        }
    }

    /// An update that only removes
    pub fn remove(ids: Vec<RuleId>) -> Self {
        Self {
            remove_rule_ids: ids,
            add_rules: Vec::new(),
        }
    }

    /// Whether the update changes nothing
    pub fn is_empty(&self) -> bool {
        self.remove_rule_ids.is_empty() && self.add_rules.is_empty()
    }
}

/// Declarative request-blocking engine
#[async_trait]
pub trait RuleEngine: Send + Sync {
    /// Current dynamic rules
    async fn get_rules(&self) -> Result<Vec<Rule>>;

    /// Apply removals, then additions, atomically
    async fn update_rules(&self, update: RuleUpdate) -> Result<()>;
}

/// Apply an update to a rule table, leaving it untouched on error
fn apply_update(table: &mut BTreeMap<RuleId, Rule>, update: &RuleUpdate) -> Result<()> {
    let mut next = table.clone();
    for id in &update.remove_rule_ids {
        next.remove(id);
    }
    for rule in &update.add_rules {
        if next.insert(rule.id, rule.clone()).is_some() {
            return Err(ByteguardError::DuplicateRuleId(rule.id));
        }
    }
    *table = next;
    Ok(())
}

/// In-memory rule engine
///
/// Rejects duplicate ids the way the browser engine does and keeps a log of
/// every accepted update.
#[derive(Debug, Default)]
pub struct InMemoryRuleEngine {
    rules: Mutex<BTreeMap<RuleId, Rule>>,
    updates: Mutex<Vec<RuleUpdate>>,
    fail_updates: AtomicBool,
}

impl InMemoryRuleEngine {
    /// Create an empty engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine that already holds `rules`
    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self {
            rules: Mutex::new(rules.into_iter().map(|r| (r.id, r)).collect()),
            ..Self::default()
        }
    }

    /// Every update accepted so far, oldest first
    pub async fn update_log(&self) -> Vec<RuleUpdate> {
        self.updates.lock().await.clone()
    }

    /// Forget the update log
    pub async fn clear_log(&self) {
        self.updates.lock().await.clear();
    }

    /// Make subsequent updates fail (or succeed again)
    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::Release);
    }
}

#[async_trait]
impl RuleEngine for InMemoryRuleEngine {
    async fn get_rules(&self) -> Result<Vec<Rule>> {
        Ok(self.rules.lock().await.values().cloned().collect())
    }

    async fn update_rules(&self, update: RuleUpdate) -> Result<()> {
        if self.fail_updates.load(Ordering::Acquire) {
            return Err(ByteguardError::RuleEngine(
                "engine unavailable".to_string(),
            ));
        }
        apply_update(&mut *self.rules.lock().await, &update)?;
        self.updates.lock().await.push(update);
        Ok(())
    }
}

/// Rule engine whose table lives in a key-value store
///
/// Dynamic rules in the browser survive restarts; this engine gives a host
/// process the same property by keeping the table under one key of a store
/// it owns exclusively.
pub struct StoredRuleEngine {
    store: Arc<dyn KeyValueStore>,
    lock: Mutex<()>,
}

impl StoredRuleEngine {
    /// Key the rule table is stored under
    pub const RULES_KEY: &'static str = "dynamicRules";

    /// Wrap a store
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<BTreeMap<RuleId, Rule>> {
        let rules: Vec<Rule> = self
            .store
            .get_value(Self::RULES_KEY)
            .await?
            .unwrap_or_default();
        Ok(rules.into_iter().map(|r| (r.id, r)).collect())
    }
}

#[async_trait]
impl RuleEngine for StoredRuleEngine {
    async fn get_rules(&self) -> Result<Vec<Rule>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.into_values().collect())
    }

    async fn update_rules(&self, update: RuleUpdate) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut table = self.load().await?;
        apply_update(&mut table, &update)?;
        let rules: Vec<Rule> = table.into_values().collect();
        self.store.set_value(Self::RULES_KEY, &rules).await
    }
}
