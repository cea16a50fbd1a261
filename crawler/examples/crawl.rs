//! Example of crawling the nostr relay network.
//!
//! Wires the crawler to a minimal NIP-01 websocket transport built on
//! tokio-tungstenite: REQ frames out, EVENT/EOSE/CLOSED frames in.

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use log::LevelFilter;
use nostr_relays_crawler::{
    ConnectionError, CrawlerBuilder, Event, Filter, Kind, RelayConnection, RelayConnector,
    RelayUpdate, RelayUrl, ScrapeOptions,
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Seed relays used when none are given on the command line.
const DEFAULT_RELAYS: [&str; 2] = ["wss://relay.damus.io", "wss://nos.lol"];

/// Subscription id used on every connection. The crawler opens at most one
/// subscription per connection, so a fixed id is enough.
const SUBSCRIPTION_ID: &str = "crawl";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Seed relay URLs to start crawling from.
    #[arg(short, long)]
    relays: Vec<String>,

    /// Event kinds to harvest.
    #[arg(short, long, default_value = "1")]
    kinds: Vec<u16>,

    /// Maximum number of events requested per relay.
    #[arg(long, default_value = "500")]
    limit: usize,

    /// Stop once this many relays are known.
    #[arg(long)]
    min_relays: Option<usize>,

    /// Stop once this many events are harvested.
    #[arg(long, default_value = "500")]
    min_events: usize,

    /// Relays per scrape batch.
    #[arg(long, default_value = "10")]
    chunk_size: usize,

    /// Batch timeout in seconds.
    #[arg(short, long, default_value = "20")]
    timeout: u64,

    /// Log level.
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector speaking NIP-01 over websockets.
#[derive(Clone)]
struct WsConnector;

struct WsRelayConnection {
    url: RelayUrl,
    stream: WsStream,
    closed: bool,
}

impl RelayConnector for WsConnector {
    type Connection = WsRelayConnection;

    fn connect(
        &self,
        url: &RelayUrl,
    ) -> impl std::future::Future<Output = Result<WsRelayConnection, ConnectionError>> + Send
    {
        let url = url.clone();
        async move {
            let (stream, _response) = connect_async(url.to_string())
                .await
                .map_err(|e| ConnectionError::Io(std::io::Error::other(e)))?;
            Ok(WsRelayConnection {
                url,
                stream,
                closed: false,
            })
        }
    }
}

impl WsRelayConnection {
    async fn send_json(&mut self, value: serde_json::Value) -> Result<(), ConnectionError> {
        self.stream
            .send(Message::Text(value.to_string()))
            .await
            .map_err(|e| ConnectionError::Io(std::io::Error::other(e)))
    }
}

impl RelayConnection for WsRelayConnection {
    async fn ready(&mut self) -> Result<(), ConnectionError> {
        // The handshake in connect() already left the socket ready.
        Ok(())
    }

    async fn subscribe(&mut self, filters: Vec<Filter>) -> Result<(), ConnectionError> {
        let mut frame = vec![
            serde_json::json!("REQ"),
            serde_json::json!(SUBSCRIPTION_ID),
        ];
        for filter in &filters {
            let value = serde_json::to_value(filter)
                .map_err(|e| ConnectionError::Io(std::io::Error::other(e)))?;
            frame.push(value);
        }
        self.send_json(serde_json::Value::Array(frame)).await
    }

    async fn next_update(&mut self) -> Result<RelayUpdate, ConnectionError> {
        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(ConnectionError::Io(std::io::Error::other(e))),
                None => return Err(ConnectionError::Closed),
            };

            match message {
                Message::Text(text) => {
                    if let Some(update) = parse_relay_frame(&text)? {
                        return Ok(update);
                    }
                }
                // Answering pings keeps slow relays from dropping us
                // mid-scrape.
                Message::Ping(payload) => {
                    let _ = self.stream.send(Message::Pong(payload)).await;
                }
                Message::Close(_) => return Err(ConnectionError::Closed),
                _ => {}
            }
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let close_frame = serde_json::json!(["CLOSE", SUBSCRIPTION_ID]);
            let _ = self.stream.send(Message::Text(close_frame.to_string())).await;
            let _ = self.stream.close(None).await;
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn url(&self) -> RelayUrl {
        self.url.clone()
    }
}

/// Parse a NIP-01 relay-to-client frame into a crawler update.
///
/// Frames that do not concern the subscription (NOTICE, OK, AUTH) and
/// frames that fail to parse are skipped by returning None.
fn parse_relay_frame(text: &str) -> Result<Option<RelayUpdate>, ConnectionError> {
    let frame: serde_json::Value = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(_) => return Ok(None),
    };
    let parts = match frame.as_array() {
        Some(parts) => parts,
        None => return Ok(None),
    };

    match parts.first().and_then(|kind| kind.as_str()) {
        Some("EVENT") => {
            let event = parts
                .get(2)
                .cloned()
                .and_then(|value| serde_json::from_value::<Event>(value).ok());
            Ok(event.map(|event| RelayUpdate::Event(Box::new(event))))
        }
        Some("EOSE") => Ok(Some(RelayUpdate::EndOfStored)),
        Some("CLOSED") => {
            let reason = parts
                .get(2)
                .and_then(|reason| reason.as_str())
                .unwrap_or("subscription closed")
                .to_string();
            Err(ConnectionError::Rejected(reason))
        }
        _ => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    // Configure fern logger
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] {} - {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log_level)
        .chain(std::io::stderr())
        .apply()
        .unwrap();

    log::info!("CRAWLING THE NOSTR RELAY NETWORK");

    let relay_args = if args.relays.is_empty() {
        DEFAULT_RELAYS.map(String::from).to_vec()
    } else {
        args.relays.clone()
    };

    let mut seeds = Vec::new();
    for relay in &relay_args {
        let url = RelayUrl::parse(relay).map_err(|e| format!("Invalid relay URL {relay}: {e}"))?;
        log::debug!("Seeding crawl with {url}");
        seeds.push(url);
    }

    let kinds = args.kinds.iter().copied().map(Kind::from);
    let filters = vec![Filter::new().kinds(kinds).limit(args.limit)];

    // Drain harvested events as they arrive.
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(harvested) = event_rx.recv().await {
            log::debug!("{harvested}");
        }
    });

    let mut crawler = CrawlerBuilder::new(WsConnector)
        .with_timeout(Duration::from_secs(args.timeout))
        .with_filters(filters)
        .with_seed_relays(seeds)
        .with_event_sender(event_tx)
        .build();

    let mut options = ScrapeOptions::new()
        .with_min_events(args.min_events)
        .with_chunk_size(args.chunk_size);
    if let Some(min_relays) = args.min_relays {
        options = options.with_min_relays(min_relays);
    }

    let events = crawler
        .scrape_all(options)
        .await
        .map_err(|e| format!("Crawler error: {e}"))?;

    let relay_count = crawler.relay_count();
    crawler.teardown().await;
    drop(crawler);
    printer.await?;

    log::info!(
        "Crawl complete - {} relays known, {} events harvested",
        relay_count,
        events.len()
    );

    Ok(())
}
