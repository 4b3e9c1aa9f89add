//! Daily reset scheduling
//!
//! The first reset happens at the next local midnight, later ones every 24
//! hours after it.

use byteguard_core::clock::Clock;
use byteguard_core::timezone::TimezoneConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::tracker::BandwidthTracker;

/// Period between resets after the first
pub const RESET_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Background task resetting daily usage at local midnight
pub struct DailyResetScheduler {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl DailyResetScheduler {
    /// Spawn the scheduler on the current runtime
    pub fn spawn(
        tracker: Arc<BandwidthTracker>,
        clock: Arc<dyn Clock>,
        timezone: TimezoneConfig,
        cancel: CancellationToken,
    ) -> Self {
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut wait = timezone.until_next_midnight(clock.now());
            info!(
                "Next daily reset in {}s ({})",
                wait.as_secs(),
                timezone.display_name()
            );

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = token.cancelled() => break,
                }

                info!("Running daily reset");
                if let Err(e) = tracker.reset_daily().await {
                    warn!("Daily reset failed: {}", e);
                }
                wait = RESET_PERIOD;
            }
        });

        Self { cancel, handle }
    }

    /// Stop the scheduler and wait for it to exit
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("Daily reset task ended abnormally: {}", e);
        }
    }
}
