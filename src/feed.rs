//! JSONL event intake
//!
//! Each non-empty line is one [`TrackerEvent`]. Lines that fail to parse and
//! events the tracker fails on are logged and skipped; intake never stops
//! early because of a single bad event.

use byteguard_core::error::Result;
use serde::Serialize;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::budget::AlertDecision;
use crate::tracker::{BandwidthTracker, TrackerEvent};

/// Counts from one intake run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSummary {
    /// Lines read, blank lines excluded
    pub lines: u64,
    /// Request events attributed to a tab and domain
    pub requests: u64,
    /// Request events dropped (no tab, no usable URL)
    pub dropped: u64,
    /// Tab-closed events
    pub tabs_closed: u64,
    /// Budget alerts fired
    pub alerts: u64,
    /// Lines that failed to parse or process
    pub errors: u64,
}

/// Feed every event from `reader` into `tracker` until EOF or cancellation
pub async fn feed_events<R>(
    tracker: &BandwidthTracker,
    mut reader: R,
    cancel: &CancellationToken,
) -> Result<FeedSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut summary = FeedSummary::default();
    let mut line_number = 0u64;

    loop {
        buf.clear();
        let read = tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => read?,
            _ = cancel.cancelled() => {
                debug!("Event intake cancelled");
                break;
            }
        };
        if read == 0 {
            break;
        }
        line_number += 1;

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line,
            Err(e) => {
                warn!("Skipping line {} that is not valid UTF-8: {}", line_number, e);
                summary.lines += 1;
                summary.errors += 1;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        summary.lines += 1;

        let event = match serde_json::from_str::<TrackerEvent>(line) {
            Ok(event) => event,
            Err(e) => {
                warn!("Failed to parse event on line {}: {}", line_number, e);
                summary.errors += 1;
                continue;
            }
        };

        match &event {
            TrackerEvent::RequestCompleted(request) => {
                match tracker.process_request(request).await {
                    Ok(Some(decision)) => {
                        summary.requests += 1;
                        if matches!(decision, AlertDecision::Alert { .. }) {
                            summary.alerts += 1;
                        }
                    }
                    Ok(None) => summary.dropped += 1,
                    Err(e) => {
                        warn!("Failed to process event on line {}: {}", line_number, e);
                        summary.errors += 1;
                    }
                }
            }
            TrackerEvent::TabRemoved(closed) => match tracker.process_tab_closed(closed).await {
                Ok(()) => summary.tabs_closed += 1,
                Err(e) => {
                    warn!("Failed to process event on line {}: {}", line_number, e);
                    summary.errors += 1;
                }
            },
        }
    }

    debug!(?summary, "Event intake finished");
    Ok(summary)
}

/// Feed a JSONL file into `tracker`
pub async fn feed_file(tracker: &BandwidthTracker, path: &Path) -> Result<FeedSummary> {
    let file = tokio::fs::File::open(path).await?;
    feed_events(tracker, BufReader::new(file), &CancellationToken::new()).await
}
