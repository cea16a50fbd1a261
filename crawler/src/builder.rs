//! Builder pattern for configuring and creating crawler instances.

use crate::connection::RelayConnector;
use crate::crawler::{Crawler, HarvestedEvent};
use nostr::{Filter, RelayUrl};
use std::time::Duration;
use tokio::sync::mpsc;

/// Default timeout for a scrape batch.
const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(20);

/// Builder for creating a customized [`Crawler`] instance.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use nostr_relays_crawler::{
///     ConnectionError, CrawlerBuilder, Filter, Kind, RelayConnection, RelayConnector,
///     RelayUpdate, RelayUrl,
/// };
///
/// // A stub transport; real callers wire in a websocket implementation.
/// struct StubConnection(RelayUrl);
///
/// impl RelayConnection for StubConnection {
///     async fn ready(&mut self) -> Result<(), ConnectionError> {
///         Ok(())
///     }
///     async fn subscribe(&mut self, _filters: Vec<Filter>) -> Result<(), ConnectionError> {
///         Ok(())
///     }
///     async fn next_update(&mut self) -> Result<RelayUpdate, ConnectionError> {
///         Ok(RelayUpdate::EndOfStored)
///     }
///     async fn close(&mut self) {}
///     fn is_closed(&self) -> bool {
///         false
///     }
///     fn url(&self) -> RelayUrl {
///         self.0.clone()
///     }
/// }
///
/// #[derive(Clone)]
/// struct StubConnector;
///
/// impl RelayConnector for StubConnector {
///     type Connection = StubConnection;
///
///     async fn connect(&self, url: &RelayUrl) -> Result<StubConnection, ConnectionError> {
///         Ok(StubConnection(url.clone()))
///     }
/// }
///
/// let crawler = CrawlerBuilder::new(StubConnector)
///     .with_timeout(Duration::from_secs(5))
///     .with_filters(vec![Filter::new().kind(Kind::TextNote).limit(50)])
///     .with_seed_relays(vec![RelayUrl::parse("wss://relay.damus.io").unwrap()])
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct CrawlerBuilder<C: RelayConnector> {
    /// Connector used to open relay connections.
    connector: C,
    /// Shared deadline for each scrape batch.
    batch_timeout: Duration,
    /// Filters used when harvesting events.
    filters: Vec<Filter>,
    /// Relays the crawler starts from.
    seed_relays: Vec<RelayUrl>,
    /// Optional observer notified of each harvested event.
    event_tx: Option<mpsc::UnboundedSender<HarvestedEvent>>,
}

impl<C: RelayConnector> CrawlerBuilder<C> {
    /// Create a new crawler builder using `connector` to reach relays.
    pub fn new(connector: C) -> Self {
        CrawlerBuilder {
            connector,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            filters: vec![Filter::new()],
            seed_relays: Vec::new(),
            event_tx: None,
        }
    }

    /// Set the timeout for each scrape batch.
    ///
    /// The timeout bounds the whole batch, connection attempts included.
    /// When it fires, relays that have not yet signaled the end of their
    /// stored events are force-closed and the batch resolves with whatever
    /// was harvested.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Maximum duration of a batch (defaults to 20 seconds).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    /// Set the filters used when harvesting events.
    ///
    /// Defaults to a single match-all filter. Relay discovery always uses
    /// its own relay-list filter and is unaffected by this setting.
    pub fn with_filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }

    /// Set the relays the crawler starts from.
    ///
    /// Seeds are trusted and admitted as-is, without the shareable-URL
    /// check applied to discovered relays, so local or private test relays
    /// work as starting points.
    pub fn with_seed_relays(mut self, seed_relays: Vec<RelayUrl>) -> Self {
        self.seed_relays = seed_relays;
        self
    }

    /// Install an observer channel for harvested events.
    ///
    /// Every harvested event is sent to `event_tx` as a [`HarvestedEvent`]
    /// before it is stored, including duplicates the store will drop. A
    /// dropped receiver is ignored.
    pub fn with_event_sender(mut self, event_tx: mpsc::UnboundedSender<HarvestedEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Build the crawler with the configured options.
    pub fn build(self) -> Crawler<C> {
        Crawler::new(
            self.connector,
            self.batch_timeout,
            self.filters,
            self.seed_relays,
            self.event_tx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_utils::MockConnector;
    use crate::crawler::ScrapeOptions;

    #[tokio::test]
    async fn test_build_with_defaults() {
        let mut crawler = CrawlerBuilder::new(MockConnector::new()).build();

        assert_eq!(crawler.relay_count(), 0);
        assert_eq!(crawler.event_count(), 0);

        // With no seeds there is nothing to scrape.
        let events = crawler.scrape_all(ScrapeOptions::new()).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_seed_relays_are_admitted() {
        let seeds = vec![
            RelayUrl::parse("wss://a.example.com").unwrap(),
            RelayUrl::parse("wss://b.example.com").unwrap(),
            // Trusted seeds skip the shareable check entirely.
            RelayUrl::parse("ws://localhost:7000").unwrap(),
        ];

        let crawler = CrawlerBuilder::new(MockConnector::new())
            .with_seed_relays(seeds.clone())
            .build();

        assert_eq!(crawler.known_relays(), seeds);
    }
}
