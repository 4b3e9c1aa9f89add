//! Notification sink
//!
//! Notifications are fire-and-forget: the core never waits on delivery and
//! never learns whether one was shown.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::types::Severity;

/// A user-facing notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Short title
    pub title: String,
    /// Body text
    pub message: String,
    /// Severity tag
    pub severity: Severity,
}

impl Notification {
    /// Create a notification
    pub fn new(title: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
        }
    }
}

/// Delivers notifications to the user
pub trait Notifier: Send + Sync {
    /// Hand off a notification
    fn notify(&self, notification: Notification);
}

/// Emits notifications as log events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match notification.severity {
            Severity::Info => {
                info!(title = %notification.title, "{}", notification.message)
            }
            severity => warn!(
                title = %notification.title,
                %severity,
                "{}",
                notification.message
            ),
        }
    }
}

/// Keeps every notification in memory
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything notified so far
    pub fn notifications(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Notifications with the given severity
    pub fn with_severity(&self, severity: Severity) -> Vec<Notification> {
        self.notifications()
            .into_iter()
            .filter(|n| n.severity == severity)
            .collect()
    }

    /// Drop everything recorded so far
    pub fn clear(&self) {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification);
    }
}
