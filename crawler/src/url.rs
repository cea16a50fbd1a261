//! Validation of relay URLs learned from untrusted sources.
//!
//! Relay-list events advertise arbitrary strings. Before a candidate is
//! admitted to the registry it must look like a publicly routable websocket
//! relay: correct scheme, sane structure, and a host that is not local,
//! private, or otherwise unreachable from the open internet.

use nostr::RelayUrl;

/// Ports accepted in advertised relay URLs.
///
/// Standard WebSocket ports plus ports commonly seen on public relays.
/// Crawling arbitrary ports makes the crawler look like a port scanner.
const ALLOWED_PORTS: &[u16] = &[80, 443, 8080, 8443, 8008, 8880, 3000, 4848, 7777, 9735];

/// Returns true if `url` is worth sharing and crawling: a structurally valid
/// websocket URL pointing at a host reachable from the public internet.
///
/// Rejects non-websocket schemes, concatenated URLs, whitespace, bare
/// hostnames, localhost and private/reserved address ranges, `.onion` and
/// `.local` hosts, and non-standard ports.
pub fn is_shareable_relay_url(url: &str) -> bool {
    let url = url.trim();

    if !url.starts_with("wss://") && !url.starts_with("ws://") {
        return false;
    }

    // Tag-concatenation bugs in the wild produce values like
    // "wss://a.example.comwss://b.example.com".
    if url.matches("://").count() != 1 {
        return false;
    }

    if url.chars().any(char::is_whitespace) {
        return false;
    }

    let authority = extract_authority(url);
    if authority.is_empty() || is_blocked_host(authority) {
        return false;
    }

    // Bare hostnames ("wss://relay") are never publicly routable.
    if !authority.starts_with('[') && !host_name(authority).contains('.') {
        return false;
    }

    if let Some(port) = extract_port(authority) {
        if !ALLOWED_PORTS.contains(&port) {
            return false;
        }
    }

    RelayUrl::parse(url).is_ok()
}

/// Checks the authority against local, private, and reserved host patterns.
fn is_blocked_host(authority: &str) -> bool {
    if authority == "localhost" || authority.starts_with("localhost:") {
        return true;
    }

    // Unspecified and loopback IPv4.
    if authority.starts_with("0.0.0.0") || authority.starts_with("127.") {
        return true;
    }

    // Private IPv4 ranges.
    if authority.starts_with("192.168.") || authority.starts_with("10.") {
        return true;
    }
    // 172.16.0.0 - 172.31.255.255
    if in_second_octet_range(authority, "172.", 16, 31) {
        return true;
    }

    // CGNAT / shared address space (100.64.0.0 - 100.127.255.255, RFC 6598).
    if in_second_octet_range(authority, "100.", 64, 127) {
        return true;
    }

    // Link-local IPv4.
    if authority.starts_with("169.254.") {
        return true;
    }

    // IPv6 loopback, link-local, unique local, and IPv4-mapped literals.
    if authority.starts_with("[::1]")
        || authority.starts_with("[fe80:")
        || authority.starts_with("[fc")
        || authority.starts_with("[fd")
        || authority.starts_with("[::ffff:")
    {
        return true;
    }

    // Tor hidden services and mDNS names are unreachable without extra setup.
    if authority.ends_with(".onion") || authority.contains(".onion:") {
        return true;
    }
    if authority.ends_with(".local") || authority.contains(".local:") {
        return true;
    }

    // Common home server misconfiguration leaking onto the network.
    if authority.contains("umbrel") {
        return true;
    }

    false
}

/// Returns true if the authority starts with `prefix` and its second octet
/// parses into `low..=high`.
fn in_second_octet_range(authority: &str, prefix: &str, low: u8, high: u8) -> bool {
    if let Some(rest) = authority.strip_prefix(prefix) {
        if let Some(second) = rest.split('.').next() {
            if let Ok(n) = second.parse::<u8>() {
                return (low..=high).contains(&n);
            }
        }
    }
    false
}

/// Extracts the authority (host and optional port) from a websocket URL.
fn extract_authority(url: &str) -> &str {
    let without_scheme = url
        .strip_prefix("wss://")
        .or_else(|| url.strip_prefix("ws://"))
        .unwrap_or(url);
    without_scheme.split('/').next().unwrap_or(without_scheme)
}

/// Strips an explicit port from the authority, leaving the host.
fn host_name(authority: &str) -> &str {
    if let Some(bracket_end) = authority.rfind(']') {
        return &authority[..=bracket_end];
    }
    match authority.rfind(':') {
        Some(colon) => &authority[..colon],
        None => authority,
    }
}

/// Extracts an explicitly specified port from the authority.
fn extract_port(authority: &str) -> Option<u16> {
    // IPv6 literals carry the port after the closing bracket.
    if let Some(bracket_end) = authority.rfind(']') {
        let after_bracket = &authority[bracket_end + 1..];
        return after_bracket.strip_prefix(':').and_then(|p| p.parse().ok());
    }
    match authority.rfind(':') {
        Some(colon) => authority[colon + 1..].parse().ok(),
        None => None,
    }
}
