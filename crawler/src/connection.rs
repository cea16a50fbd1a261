//! Relay connection abstractions and the connection pool.
//!
//! The crawler never speaks the relay wire protocol itself. It consumes
//! connections through the [`RelayConnection`] and [`RelayConnector`] traits,
//! enabling dependency injection for testing and leaving transport concerns
//! (websockets, framing, reconnection) to the implementor.

use nostr::{Event, Filter, RelayUrl};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Errors that can occur while connecting to or reading from a relay.
#[derive(Debug)]
pub enum ConnectionError {
    /// An I/O error occurred during transport operations.
    Io(io::Error),
    /// The connection was closed.
    Closed,
    /// The relay refused or terminated the subscription.
    Rejected(String),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Io(err) => write!(f, "Connection error: {err}"),
            ConnectionError::Closed => write!(f, "Connection closed"),
            ConnectionError::Rejected(reason) => {
                write!(f, "Relay rejected the subscription: {reason}")
            }
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectionError::Io(err) => Some(err),
            ConnectionError::Closed => None,
            ConnectionError::Rejected(_) => None,
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        ConnectionError::Io(err)
    }
}

/// A message observed on an active relay subscription.
#[derive(Debug, Clone)]
pub enum RelayUpdate {
    /// An event matching the subscription filters.
    Event(Box<Event>),
    /// The relay signaled that all stored events have been sent (EOSE).
    /// Anything after this would be real-time gossip, which the crawler
    /// does not wait around for.
    EndOfStored,
}

/// A live subscription-capable connection to a single relay.
///
/// Implementations own the wire protocol. The crawler only drives the
/// subscribe/read/close lifecycle.
pub trait RelayConnection: Send {
    /// Wait until the connection is ready to accept a subscription.
    ///
    /// Best effort: the crawler treats failures here as non-fatal and
    /// proceeds to subscribe anyway.
    fn ready(&mut self) -> impl std::future::Future<Output = Result<(), ConnectionError>> + Send;

    /// Open a subscription for the given filters.
    fn subscribe(
        &mut self,
        filters: Vec<Filter>,
    ) -> impl std::future::Future<Output = Result<(), ConnectionError>> + Send;

    /// Read the next update from the subscription.
    ///
    /// This future may be pending indefinitely on a quiet relay; callers
    /// bound it with a timeout.
    fn next_update(
        &mut self,
    ) -> impl std::future::Future<Output = Result<RelayUpdate, ConnectionError>> + Send;

    /// Close the connection. Idempotent, never fails.
    fn close(&mut self) -> impl std::future::Future<Output = ()> + Send;

    /// Whether the connection has been closed.
    fn is_closed(&self) -> bool;

    /// The relay this connection points at.
    fn url(&self) -> RelayUrl;
}

/// Factory trait for creating relay connections.
///
/// This trait enables dependency injection for connection creation,
/// allowing different implementations for production and testing.
pub trait RelayConnector: Clone + Send + Sync + 'static {
    type Connection: RelayConnection + Send + 'static;

    /// Open a connection to the relay at `url`.
    fn connect(
        &self,
        url: &RelayUrl,
    ) -> impl std::future::Future<Output = Result<Self::Connection, ConnectionError>> + Send;
}

/// Pool of relay connections keyed by URL.
///
/// Acquiring a URL twice while the connection is still open returns the same
/// connection. A pooled connection that has been closed, which is the normal
/// end state of every scrape batch, is transparently replaced on the next
/// acquire. Clones share the same underlying pool, which lets the tasks of
/// a scrape batch open their connections concurrently.
pub(crate) struct RelayPool<C: RelayConnector> {
    connector: C,
    connections: Arc<Mutex<HashMap<RelayUrl, Arc<Mutex<C::Connection>>>>>,
}

// Manual impl: derive(Clone) would demand `C::Connection: Clone`, which
// connections never are. Cloning only copies the connector and the shared
// pool handle.
impl<C: RelayConnector> Clone for RelayPool<C> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
            connections: self.connections.clone(),
        }
    }
}

impl<C: RelayConnector> RelayPool<C> {
    pub(crate) fn new(connector: C) -> Self {
        Self {
            connector,
            connections: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get the pooled connection for `url`, opening one if none exists or
    /// the pooled one has been closed.
    ///
    /// The pool lock is not held while connecting, so concurrent acquires
    /// for different relays overlap.
    pub(crate) async fn acquire(
        &self,
        url: &RelayUrl,
    ) -> Result<Arc<Mutex<C::Connection>>, ConnectionError> {
        let existing = self.connections.lock().await.get(url).cloned();
        if let Some(conn) = existing {
            if !conn.lock().await.is_closed() {
                return Ok(conn);
            }
        }

        let conn = Arc::new(Mutex::new(self.connector.connect(url).await?));
        self.connections.lock().await.insert(url.clone(), conn.clone());
        Ok(conn)
    }

    /// Close every pooled connection, keeping the pool entries around for
    /// later reuse.
    pub(crate) async fn disconnect_all(&self) {
        let connections: Vec<_> = self.connections.lock().await.values().cloned().collect();
        for conn in connections {
            conn.lock().await.close().await;
        }
    }

    /// Close every pooled connection and release the pool.
    pub(crate) async fn teardown(&self) {
        self.disconnect_all().await;
        self.connections.lock().await.clear();
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::{self, MockConnector, MockRelayConnection};
    use super::*;

    fn url(s: &str) -> RelayUrl {
        RelayUrl::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_pool_reuses_open_connection() {
        let connector = MockConnector::new();
        connector.add_connection(MockRelayConnection::new("wss://a.example.com"));
        let pool = RelayPool::new(connector.clone());

        let first = pool.acquire(&url("wss://a.example.com")).await.unwrap();
        let second = pool.acquire(&url("wss://a.example.com")).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.attempt_count(), 1);
    }

    #[tokio::test]
    async fn test_pool_clones_share_connections() {
        let connector = MockConnector::new();
        connector.add_connection(MockRelayConnection::new("wss://a.example.com"));
        let pool = RelayPool::new(connector.clone());

        let shared = pool.clone();
        let conn = shared.acquire(&url("wss://a.example.com")).await.unwrap();
        let reused = pool.acquire(&url("wss://a.example.com")).await.unwrap();

        assert!(Arc::ptr_eq(&conn, &reused));
        assert_eq!(connector.attempt_count(), 1);
    }

    #[tokio::test]
    async fn test_pool_replaces_closed_connection() {
        let connector = MockConnector::new();
        connector.add_connection(MockRelayConnection::new("wss://a.example.com"));
        connector.add_connection(MockRelayConnection::new("wss://a.example.com"));
        let pool = RelayPool::new(connector.clone());

        let first = pool.acquire(&url("wss://a.example.com")).await.unwrap();
        first.lock().await.close().await;

        let second = pool.acquire(&url("wss://a.example.com")).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.lock().await.is_closed());
        assert_eq!(connector.attempt_count(), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_propagates() {
        let connector = MockConnector::new();
        let pool = RelayPool::new(connector);

        let result = pool.acquire(&url("wss://missing.example.com")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_all_closes_but_keeps_entries() {
        let connector = MockConnector::new();
        connector.add_connection(MockRelayConnection::new("wss://a.example.com"));
        connector.add_connection(MockRelayConnection::new("wss://b.example.com"));
        let pool = RelayPool::new(connector);

        let a = pool.acquire(&url("wss://a.example.com")).await.unwrap();
        let b = pool.acquire(&url("wss://b.example.com")).await.unwrap();

        pool.disconnect_all().await;

        assert!(a.lock().await.is_closed());
        assert!(b.lock().await.is_closed());
        assert_eq!(pool.connections.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_teardown_releases_pool() {
        let connector = MockConnector::new();
        connector.add_connection(MockRelayConnection::new("wss://a.example.com"));
        let pool = RelayPool::new(connector);

        let conn = pool.acquire(&url("wss://a.example.com")).await.unwrap();
        pool.teardown().await;

        assert!(conn.lock().await.is_closed());
        assert!(pool.connections.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_mock_plays_back_script() {
        let mut conn = MockRelayConnection::new("wss://a.example.com");
        conn.add_event(test_utils::text_event("hello"));
        conn.add_end_of_stored();

        assert!(matches!(
            conn.next_update().await,
            Ok(RelayUpdate::Event(_))
        ));
        assert!(matches!(
            conn.next_update().await,
            Ok(RelayUpdate::EndOfStored)
        ));

        conn.close().await;
        assert!(conn.is_closed());
        assert!(matches!(
            conn.next_update().await,
            Err(ConnectionError::Closed)
        ));
    }
}
