mod builder;
mod connection;
mod crawler;
mod registry;
mod session;
mod store;
mod url;

pub use builder::CrawlerBuilder;
pub use connection::{ConnectionError, RelayConnection, RelayConnector, RelayUpdate};
pub use crawler::{Crawler, HarvestedEvent, ScrapeError, ScrapeOptions};
pub use url::is_shareable_relay_url;

// Re-exports.
pub use nostr::{Event, EventId, Filter, Kind, RelayUrl};
