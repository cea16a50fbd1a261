//! Batch scrape session over a set of relays.
//!
//! A batch opens one subscription per relay, fans the resulting events into
//! the control task, and resolves once every relay has been closed, whether
//! because it finished sending stored events, failed, or ran into the shared
//! batch deadline.

use crate::connection::{RelayConnection, RelayConnector, RelayPool, RelayUpdate};
use log::debug;
use nostr::{Event, Filter, RelayUrl};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

/// Capacity of the channel carrying events from relay tasks to the control
/// task. Bounded so a chatty relay cannot buffer unboundedly ahead of the
/// sequential callback.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Subscribe to every relay in `urls` with `filters` and deliver each event
/// to `on_event` until all relays are done or `batch_timeout` elapses.
///
/// Connection failures are swallowed: the relay contributes no events and
/// the batch carries on. Each per-relay task opens its own connection, so
/// opens overlap, and every transport call, the open included, runs under
/// the shared batch deadline; the batch resolves on time even against a
/// relay that stalls mid-handshake. Every connection the batch acquires is
/// closed again by the time this function returns. `on_event` runs on the
/// control task, so registry and store mutations stay single-threaded.
pub(crate) async fn run_batch<C, F>(
    pool: &RelayPool<C>,
    urls: &[RelayUrl],
    filters: Vec<Filter>,
    batch_timeout: Duration,
    mut on_event: F,
) where
    C: RelayConnector,
    F: FnMut(&RelayUrl, Event),
{
    let deadline = Instant::now() + batch_timeout;
    let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let mut tasks = Vec::with_capacity(urls.len());

    for url in urls {
        let url = url.clone();
        let filters = filters.clone();
        let event_tx = event_tx.clone();
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let handle = match timeout_at(deadline, pool.acquire(&url)).await {
                Ok(Ok(handle)) => handle,
                Ok(Err(e)) => {
                    // A dead relay is business as usual, not a batch failure.
                    debug!("Failed to connect to {url}: {e}");
                    return;
                }
                Err(_) => {
                    debug!("Connecting to {url} timed out");
                    return;
                }
            };
            let mut conn = handle.lock().await;

            // Readiness is best effort. A relay that never signals it may
            // still answer the subscription.
            if let Ok(Err(e)) = timeout_at(deadline, conn.ready()).await {
                debug!("Relay {url} readiness failed: {e}");
            }

            match timeout_at(deadline, conn.subscribe(filters)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!("Failed to subscribe to {url}: {e}");
                    let _ = timeout_at(deadline, conn.close()).await;
                    return;
                }
                Err(_) => {
                    debug!("Subscribing to {url} timed out");
                    let _ = timeout_at(deadline, conn.close()).await;
                    return;
                }
            }

            loop {
                match timeout_at(deadline, conn.next_update()).await {
                    Ok(Ok(RelayUpdate::Event(event))) => {
                        if event_tx.send((url.clone(), *event)).await.is_err() {
                            // Control task hung up, stop reading.
                            break;
                        }
                    }
                    Ok(Ok(RelayUpdate::EndOfStored)) => {
                        debug!("Relay {url} reached end of stored events");
                        break;
                    }
                    Ok(Err(e)) => {
                        debug!("Error reading from {url}: {e}");
                        break;
                    }
                    Err(_) => {
                        debug!("Relay {url} timed out");
                        break;
                    }
                }
            }

            // Every path through a batch leaves the connection closed. A
            // close that itself hangs is cut off at the deadline instead of
            // stalling the batch.
            let _ = timeout_at(deadline, conn.close()).await;
        }));
    }

    // Once the relay tasks drop their senders the channel drains to None,
    // which doubles as the all-relays-closed signal for the batch.
    drop(event_tx);
    while let Some((url, event)) = event_rx.recv().await {
        on_event(&url, event);
    }

    for task in tasks {
        let _ = task.await;
    }
}
