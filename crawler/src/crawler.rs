//! The crawler: relay discovery, event harvesting, and the convergence loop.

use crate::connection::{RelayConnector, RelayPool};
use crate::registry::RelayRegistry;
use crate::session;
use crate::store::EventStore;
use log::info;
use nostr::{Event, Filter, Kind, RelayUrl};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default number of relays per scrape batch.
const DEFAULT_CHUNK_SIZE: usize = 10;
/// Maximum number of relay-list events requested per relay during discovery.
const DISCOVERY_EVENT_LIMIT: usize = 100;

/// Errors that can occur when starting a scrape run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeError {
    /// The chunk size was zero; a batch must contain at least one relay.
    InvalidChunkSize,
}

impl fmt::Display for ScrapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrapeError::InvalidChunkSize => {
                write!(f, "Invalid chunk size: a batch must contain at least one relay")
            }
        }
    }
}

impl std::error::Error for ScrapeError {}

/// An event harvested from a relay, paired with the relay that served it.
#[derive(Debug, Clone)]
pub struct HarvestedEvent {
    /// The relay the event was received from.
    pub relay: RelayUrl,
    /// The harvested event.
    pub event: Event,
}

impl fmt::Display for HarvestedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event {} from {}", self.event.id, self.relay)
    }
}

/// Options for a [`Crawler::scrape_all`] run.
///
/// # Example
///
/// ```
/// use nostr_relays_crawler::ScrapeOptions;
///
/// let options = ScrapeOptions::new()
///     .with_min_relays(500)
///     .with_min_events(10_000)
///     .with_chunk_size(25);
/// ```
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    /// Stop once this many relays are known. None keeps discovering until
    /// the network is exhausted.
    min_relays: Option<usize>,
    /// Stop once this many events are stored. None keeps harvesting until
    /// the network is exhausted.
    min_events: Option<usize>,
    /// Number of relays per scrape batch.
    chunk_size: usize,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        ScrapeOptions {
            min_relays: None,
            min_events: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ScrapeOptions {
    /// Create options with default settings: no minimums (crawl until
    /// exhaustion) and batches of ten relays.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop scraping once this many relays are known.
    pub fn with_min_relays(mut self, min_relays: usize) -> Self {
        self.min_relays = Some(min_relays);
        self
    }

    /// Stop scraping once this many events are stored.
    pub fn with_min_events(mut self, min_events: usize) -> Self {
        self.min_events = Some(min_events);
        self
    }

    /// Set the number of relays per scrape batch.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

/// A crawler for the nostr relay network.
///
/// Starting from seed relays, the crawler discovers further relays through
/// NIP-65 relay-list events and harvests events matching its configured
/// filters, one bounded batch of concurrent subscriptions at a time. Every
/// relay is asked at most once for events and at most once for its relay
/// lists; there are no retries.
pub struct Crawler<C: RelayConnector> {
    /// Pooled connections, reopened on demand across batches.
    pool: RelayPool<C>,
    /// Shared deadline for each scrape batch.
    batch_timeout: Duration,
    /// Filters used when harvesting events.
    filters: Vec<Filter>,
    /// Known relays and their scrape state.
    registry: RelayRegistry,
    /// Harvested events, deduplicated by id.
    store: EventStore,
    /// Optional observer notified of each harvested event.
    event_tx: Option<mpsc::UnboundedSender<HarvestedEvent>>,
}

impl<C: RelayConnector> Crawler<C> {
    pub(crate) fn new(
        connector: C,
        batch_timeout: Duration,
        filters: Vec<Filter>,
        seed_relays: Vec<RelayUrl>,
        event_tx: Option<mpsc::UnboundedSender<HarvestedEvent>>,
    ) -> Self {
        let mut registry = RelayRegistry::new();
        for url in seed_relays {
            registry.insert(url);
        }

        Crawler {
            pool: RelayPool::new(connector),
            batch_timeout,
            filters,
            registry,
            store: EventStore::new(),
            event_tx,
        }
    }

    /// Harvest events from `urls` using the configured filters.
    ///
    /// The relays are marked as scraped before the batch starts, so a relay
    /// that fails or times out is not retried. Each harvested event is
    /// reported to the observer channel, if one is installed, and then
    /// stored with id-level deduplication.
    pub async fn scrape_events_from(&mut self, urls: &[RelayUrl]) {
        self.registry.mark_scraped_for_events(urls);
        info!("Scraping events from {} relays", urls.len());

        let filters = self.filters.clone();
        let batch_timeout = self.batch_timeout;
        let Self {
            pool,
            store,
            event_tx,
            ..
        } = self;

        session::run_batch(pool, urls, filters, batch_timeout, |relay, event| {
            if let Some(tx) = event_tx {
                let _ = tx.send(HarvestedEvent {
                    relay: relay.clone(),
                    event: event.clone(),
                });
            }
            store.insert(event);
        })
        .await;
    }

    /// Ask `urls` for their relay lists and admit newly discovered relays.
    ///
    /// Runs a single batch subscribed to NIP-65 relay-list events. Every
    /// `r` tag on a delivered event is a candidate relay URL; candidates
    /// that fail the shareable check are dropped. The relay-list events
    /// themselves are not stored.
    pub async fn scrape_relays_from(&mut self, urls: &[RelayUrl]) {
        self.registry.mark_scraped_for_relays(urls);
        info!("Scraping relay lists from {} relays", urls.len());

        let filters = vec![Filter::new()
            .kind(Kind::RelayList)
            .limit(DISCOVERY_EVENT_LIMIT)];
        let batch_timeout = self.batch_timeout;
        let Self { pool, registry, .. } = self;

        session::run_batch(pool, urls, filters, batch_timeout, |_, event| {
            for tag in event.tags.iter() {
                let parts = tag.as_slice();
                if parts.first().map(String::as_str) == Some("r") {
                    if let Some(candidate) = parts.get(1) {
                        registry.add_discovered(candidate);
                    }
                }
            }
        })
        .await;
    }

    /// Crawl the relay network until the configured minimums are reached or
    /// every known relay has been scraped.
    ///
    /// Each round scrapes one batch of up to `chunk_size` relays. Batches
    /// that harvest events from known relays take priority; only when every
    /// known relay has been asked for events does the crawler spend a batch
    /// on relay discovery.
    ///
    /// # Termination
    ///
    /// The loop ends when both minimums are satisfied, or when every known
    /// relay has been scraped both ways. Since relays are never rescraped,
    /// the number of rounds is bounded by the number of relays discovered.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<Event>)` - The harvested events, deduplicated by id.
    /// * `Err(ScrapeError)` - If the options are invalid. Checked before
    ///   any network activity.
    pub async fn scrape_all(&mut self, options: ScrapeOptions) -> Result<Vec<Event>, ScrapeError> {
        if options.chunk_size == 0 {
            return Err(ScrapeError::InvalidChunkSize);
        }

        loop {
            let below_relays = options
                .min_relays
                .map_or(true, |min| self.registry.known_count() < min);
            let below_events = options
                .min_events
                .map_or(true, |min| self.store.len() < min);
            if !below_relays && !below_events {
                break;
            }

            let event_urls = self.registry.unscraped_for_events(options.chunk_size);
            let relay_urls = self.registry.unscraped_for_relays(options.chunk_size);

            if !event_urls.is_empty() {
                self.scrape_events_from(&event_urls).await;
            } else if !relay_urls.is_empty() {
                self.scrape_relays_from(&relay_urls).await;
            } else {
                info!(
                    "Crawler exhausted - {} relays known, {} events stored",
                    self.registry.known_count(),
                    self.store.len()
                );
                break;
            }
        }

        Ok(self.store.values().cloned().collect())
    }

    /// Close every pooled relay connection, keeping the pool for later
    /// scrapes.
    pub async fn disconnect(&mut self) {
        self.pool.disconnect_all().await;
    }

    /// Close every pooled relay connection and release the pool.
    pub async fn teardown(&mut self) {
        self.pool.teardown().await;
    }

    /// All relays known to the crawler, in the order they were learned.
    pub fn known_relays(&self) -> Vec<RelayUrl> {
        self.registry.known().to_vec()
    }

    /// Number of relays known to the crawler.
    pub fn relay_count(&self) -> usize {
        self.registry.known_count()
    }

    /// Number of events harvested so far.
    pub fn event_count(&self) -> usize {
        self.store.len()
    }

    /// Iterate over the events harvested so far.
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.store.values()
    }
}
