//! Request/response message API
//!
//! Messages are JSON objects tagged by `action`, the shape UI surfaces send
//! to the background core. Every request gets a response; failures are
//! reported as `{"success": false, "error": ...}` instead of an `Err`.

use byteguard_blocking::LowDataStatus;
use byteguard_core::error::Result;
use byteguard_core::types::{BudgetSettings, Domain, UsageState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::tracker::BandwidthTracker;

/// A message to the core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    ToggleLowDataMode,
    GetLowDataStatus,
    BlockDomain { domain: String },
    UnblockDomain { domain: String },
    GetUsage,
    GetSettings,
    SaveSettings { settings: BudgetSettings },
    SetAutoLowData { enabled: bool },
}

/// Reply to a [`Request`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Toggled {
        enabled: bool,
    },
    Status(LowDataStatus),
    Outcome {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Usage(UsageState),
    Settings(BudgetSettings),
}

impl Response {
    fn outcome(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::Outcome {
                success: true,
                error: None,
            },
            Err(e) => Self::Outcome {
                success: false,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Dispatches messages to the tracker
#[derive(Clone)]
pub struct MessageRouter {
    tracker: Arc<BandwidthTracker>,
}

impl MessageRouter {
    /// Route messages to `tracker`
    pub fn new(tracker: Arc<BandwidthTracker>) -> Self {
        Self { tracker }
    }

    /// Handle one message
    pub async fn handle(&self, request: Request) -> Response {
        debug!(?request, "Handling message");
        let blocking = self.tracker.blocking();

        match request {
            Request::ToggleLowDataMode => match blocking.toggle().await {
                Ok(enabled) => Response::Toggled { enabled },
                Err(e) => {
                    warn!("Toggle failed: {}", e);
                    Response::outcome(Err(e))
                }
            },
            Request::GetLowDataStatus => Response::Status(blocking.status().await),
            Request::BlockDomain { domain } => {
                let result = match Domain::parse(&domain) {
                    Ok(domain) => blocking.block_domain(&domain).await,
                    Err(e) => Err(e),
                };
                Response::outcome(result)
            }
            Request::UnblockDomain { domain } => {
                let result = match Domain::parse(&domain) {
                    Ok(domain) => blocking.unblock_domain(&domain).await,
                    Err(e) => Err(e),
                };
                Response::outcome(result)
            }
            Request::GetUsage => Response::Usage(self.tracker.ledger().snapshot().await),
            Request::GetSettings => match self.tracker.settings().load().await {
                Ok(settings) => Response::Settings(settings),
                Err(e) => Response::outcome(Err(e)),
            },
            Request::SaveSettings { settings } => {
                Response::outcome(self.tracker.settings().save(&settings).await)
            }
            Request::SetAutoLowData { enabled } => {
                Response::outcome(blocking.set_auto_low_data(enabled).await)
            }
        }
    }

    /// Handle one JSON-encoded message, returning the JSON reply
    pub async fn handle_json(&self, message: &str) -> Result<String> {
        let request: Request = serde_json::from_str(message)?;
        let response = self.handle(request).await;
        Ok(serde_json::to_string(&response)?)
    }
}
