//! Registry of known relays and their scrape state.
//!
//! The registry is the crawler's memory: every relay URL it has learned
//! about, in the order it learned about them, along with which of those
//! relays have already been asked for events and which have already been
//! asked for their relay lists. All of its sets only ever grow, so a relay
//! is attempted at most once per scrape kind, with no retries.

use crate::url::is_shareable_relay_url;
use nostr::RelayUrl;
use std::collections::HashSet;

/// Tracks known relay URLs and which have been scraped.
#[derive(Debug, Default)]
pub(crate) struct RelayRegistry {
    /// Every admitted relay in first-seen order. Selection for the next
    /// batch walks this list, so ordering is deterministic.
    known: Vec<RelayUrl>,
    /// Membership index over `known`.
    known_set: HashSet<RelayUrl>,
    /// Relays whose relay lists have been requested.
    scraped_for_relays: HashSet<RelayUrl>,
    /// Relays whose events have been requested.
    scraped_for_events: HashSet<RelayUrl>,
}

impl RelayRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Admit a trusted relay URL, deduplicating against known ones.
    ///
    /// Returns true if the URL was new.
    pub(crate) fn insert(&mut self, url: RelayUrl) -> bool {
        if self.known_set.insert(url.clone()) {
            self.known.push(url);
            true
        } else {
            false
        }
    }

    /// Admit a candidate URL learned from an untrusted source, typically an
    /// `r` tag in a relay-list event.
    ///
    /// Candidates that fail the shareable-URL check or do not parse are
    /// silently dropped. Returns true if the candidate was admitted as new.
    pub(crate) fn add_discovered(&mut self, candidate: &str) -> bool {
        if !is_shareable_relay_url(candidate) {
            return false;
        }
        match RelayUrl::parse(candidate.trim()) {
            Ok(url) => self.insert(url),
            Err(_) => false,
        }
    }

    /// Mark relays as having been asked for events.
    ///
    /// Unknown URLs are admitted at the same time so the scraped sets stay
    /// subsets of the known set.
    pub(crate) fn mark_scraped_for_events(&mut self, urls: &[RelayUrl]) {
        for url in urls {
            self.insert(url.clone());
            self.scraped_for_events.insert(url.clone());
        }
    }

    /// Mark relays as having been asked for their relay lists.
    pub(crate) fn mark_scraped_for_relays(&mut self, urls: &[RelayUrl]) {
        for url in urls {
            self.insert(url.clone());
            self.scraped_for_relays.insert(url.clone());
        }
    }

    /// Up to `limit` known relays not yet scraped for events, in first-seen
    /// order.
    pub(crate) fn unscraped_for_events(&self, limit: usize) -> Vec<RelayUrl> {
        self.known
            .iter()
            .filter(|url| !self.scraped_for_events.contains(url))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Up to `limit` known relays not yet scraped for their relay lists.
    pub(crate) fn unscraped_for_relays(&self, limit: usize) -> Vec<RelayUrl> {
        self.known
            .iter()
            .filter(|url| !self.scraped_for_relays.contains(url))
            .take(limit)
            .cloned()
            .collect()
    }

    /// All known relays in first-seen order.
    pub(crate) fn known(&self) -> &[RelayUrl] {
        &self.known
    }

    pub(crate) fn known_count(&self) -> usize {
        self.known.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> RelayUrl {
        RelayUrl::parse(s).unwrap()
    }

    #[test]
    fn test_insert_deduplicates() {
        let mut registry = RelayRegistry::new();

        assert!(registry.insert(url("wss://a.example.com")));
        assert!(registry.insert(url("wss://b.example.com")));
        assert!(!registry.insert(url("wss://a.example.com")));

        assert_eq!(registry.known_count(), 2);
        assert_eq!(
            registry.known(),
            &[url("wss://a.example.com"), url("wss://b.example.com")]
        );
    }

    #[test]
    fn test_add_discovered_gates_on_shareable() {
        let mut registry = RelayRegistry::new();

        assert!(registry.add_discovered("wss://relay.example.com"));
        assert!(!registry.add_discovered("wss://localhost:8080"));
        assert!(!registry.add_discovered("https://relay.example.com"));
        assert!(!registry.add_discovered("not a url"));

        assert_eq!(registry.known_count(), 1);
    }

    #[test]
    fn test_unscraped_respects_order_and_limit() {
        let mut registry = RelayRegistry::new();
        registry.insert(url("wss://a.example.com"));
        registry.insert(url("wss://b.example.com"));
        registry.insert(url("wss://c.example.com"));

        registry.mark_scraped_for_events(&[url("wss://a.example.com")]);

        let next = registry.unscraped_for_events(1);
        assert_eq!(next, vec![url("wss://b.example.com")]);

        let next = registry.unscraped_for_events(10);
        assert_eq!(
            next,
            vec![url("wss://b.example.com"), url("wss://c.example.com")]
        );

        // The relay-list marker set is independent of the event marker set.
        assert_eq!(registry.unscraped_for_relays(10).len(), 3);
    }

    #[test]
    fn test_mark_admits_unknown_urls() {
        let mut registry = RelayRegistry::new();

        registry.mark_scraped_for_events(&[url("wss://a.example.com")]);

        assert_eq!(registry.known_count(), 1);
        assert!(registry.unscraped_for_events(10).is_empty());
        assert_eq!(registry.unscraped_for_relays(10).len(), 1);
    }

    #[test]
    fn test_marking_is_idempotent() {
        let mut registry = RelayRegistry::new();
        registry.insert(url("wss://a.example.com"));

        registry.mark_scraped_for_events(&[url("wss://a.example.com")]);
        registry.mark_scraped_for_events(&[url("wss://a.example.com")]);

        assert_eq!(registry.known_count(), 1);
        assert!(registry.unscraped_for_events(10).is_empty());
    }
}
