//! Budget settings persistence
//!
//! Settings are written with install defaults on first run and afterwards
//! only change through an explicit save.

use byteguard_core::error::Result;
use byteguard_core::notify::{Notification, Notifier};
use byteguard_core::store::{KeyValueStore, KeyValueStoreExt, StoreMap, keys};
use byteguard_core::types::{BudgetSettings, Severity, UsageState};
use std::sync::Arc;
use tracing::info;

/// Reads and writes [`BudgetSettings`] under the `settings` key
#[derive(Clone)]
pub struct SettingsStore {
    store: Arc<dyn KeyValueStore>,
}

impl SettingsStore {
    /// Wrap a store
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Write install defaults for settings and usage in one call
    pub async fn set_defaults(&self) -> Result<()> {
        let mut items = StoreMap::new();
        items.insert(
            keys::SETTINGS.to_string(),
            serde_json::to_value(BudgetSettings::default())?,
        );
        items.insert(
            keys::USAGE.to_string(),
            serde_json::to_value(UsageState::default())?,
        );
        self.store.set(items).await
    }

    /// Current settings; missing fields take their defaults
    pub async fn load(&self) -> Result<BudgetSettings> {
        Ok(self
            .store
            .get_value(keys::SETTINGS)
            .await?
            .unwrap_or_default())
    }

    /// Replace the settings
    pub async fn save(&self, settings: &BudgetSettings) -> Result<()> {
        self.store.set_value(keys::SETTINGS, settings).await
    }

    /// First-run setup: write defaults and greet the user when no settings
    /// exist yet. Returns whether this was a first run.
    ///
    /// Usage already on disk is left alone.
    pub async fn initialize(&self, notifier: &dyn Notifier) -> Result<bool> {
        let existing = self.store.get(&[keys::SETTINGS, keys::USAGE]).await?;
        if existing.contains_key(keys::SETTINGS) {
            return Ok(false);
        }

        info!("No settings found, writing install defaults");
        if existing.contains_key(keys::USAGE) {
            self.save(&BudgetSettings::default()).await?;
        } else {
            self.set_defaults().await?;
        }
        notifier.notify(Notification::new(
            "Welcome to Bandwidth Budget Tracker!",
            "Thanks for installing! Your daily budget is set to 500 MB.",
            Severity::Info,
        ));
        Ok(true)
    }

    /// Wipe every key, then write install defaults
    pub async fn clear_all_data(&self) -> Result<()> {
        info!("Clearing all stored data");
        self.store.clear().await?;
        self.set_defaults().await
    }
}
