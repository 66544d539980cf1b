//! Periodic report of in-flight job ids to the queue service.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics::MetricsCollector;
use crate::queue::QueueClient;
use crate::registry::JobRegistry;

/// Sends the registry snapshot every `interval` until `cancel` fires.
///
/// Failures are logged and retried on the next tick.
pub fn spawn_heartbeat<C>(
    client: Arc<C>,
    registry: Arc<JobRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    C: QueueClient + ?Sized,
{
    let metrics = MetricsCollector::new();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let ids = registry.list();
                    match client.heartbeat(&ids).await {
                        Ok(()) => {
                            debug!(in_flight = ids.len(), "Heartbeat sent");
                            metrics.record_heartbeat(true);
                        }
                        Err(e) => {
                            warn!(error = %e, "Heartbeat failed");
                            metrics.record_heartbeat(false);
                        }
                    }
                }
            }
        }
    })
}
