//! Client IP resolution for request handlers.
//!
//! Behind a reverse proxy the TCP peer address is the proxy, not the client.
//! Proxies conventionally forward the original address in `X-Real-Ip` or
//! `X-Forwarded-For`.  [`remote_ip`] consults those headers first and only
//! then falls back to the host part of the raw peer address string.
//!
//! # Resolution order
//!
//! | Step | Source                         | Result                         |
//! |------|--------------------------------|--------------------------------|
//! | 1    | `X-Real-Ip` header             | header value                   |
//! | 2    | `X-Forwarded-For` header       | header value                   |
//! | 3    | raw address `host:port`        | `host`                         |
//! | 4    | raw address without a port     | the address itself             |
//! | 5    | raw address malformed or empty | `127.0.0.1`                    |
//!
//! Header values are trusted as-is; this helper does not validate that they
//! are well-formed IP addresses.  Only deploy it behind a proxy that
//! overwrites these headers.

use std::net::Ipv6Addr;

use thiserror::Error;

/// Header set by nginx-style proxies to the single original client address.
pub const X_REAL_IP: &str = "X-Real-Ip";

/// Header listing the client followed by every proxy hop.
pub const X_FORWARDED_FOR: &str = "X-Forwarded-For";

/// Address returned when nothing usable can be extracted.
pub const LOOPBACK: &str = "127.0.0.1";

/// Errors from [`split_host_port`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HostPortError {
    #[error("missing port in address")]
    MissingPort,
    #[error("too many colons in address")]
    TooManyColons,
    #[error("missing ']' in address")]
    MissingClosingBracket,
    #[error("unexpected '[' in address")]
    UnexpectedOpeningBracket,
    #[error("unexpected ']' in address")]
    UnexpectedClosingBracket,
}

/// Anything a handler can resolve a client address from.
///
/// Implemented by [`RequestMeta`]; handlers with their own request type can
/// implement it directly.
pub trait ClientAddrSource {
    /// Returns the first value of the named header, matched
    /// case-insensitively, or `None` if absent.
    fn header(&self, name: &str) -> Option<&str>;

    /// Returns the raw peer address string (normally `host:port`).
    fn remote_addr(&self) -> &str;
}

/// Minimal request description: a header list and the raw peer address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    headers: Vec<(String, String)>,
    remote_addr: String,
}

impl RequestMeta {
    /// Creates a request description with no headers.
    pub fn new(remote_addr: impl Into<String>) -> Self {
        Self {
            headers: Vec::new(),
            remote_addr: remote_addr.into(),
        }
    }

    /// Builder-style header insertion.  Later duplicates do not shadow
    /// earlier ones.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push_header(name, value);
        self
    }

    /// Appends a header.
    pub fn push_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Replaces the raw peer address.
    pub fn set_remote_addr(&mut self, remote_addr: impl Into<String>) {
        self.remote_addr = remote_addr.into();
    }

    /// Number of headers stored.
    pub fn header_count(&self) -> usize {
        self.headers.len()
    }
}

impl ClientAddrSource for RequestMeta {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn remote_addr(&self) -> &str {
        &self.remote_addr
    }
}

/// Resolves the best-effort client IP for a request.
///
/// See the [module documentation](self) for the resolution order.
///
/// # Example
///
/// ```rust
/// use graceful_core::{remote_ip, RequestMeta};
///
/// let req = RequestMeta::new("10.0.0.7:51234");
/// assert_eq!(remote_ip(&req), "10.0.0.7");
///
/// let proxied = RequestMeta::new("10.0.0.1:80").with_header("X-Real-Ip", "203.0.113.9");
/// assert_eq!(remote_ip(&proxied), "203.0.113.9");
/// ```
pub fn remote_ip<R: ClientAddrSource + ?Sized>(req: &R) -> String {
    if let Some(ip) = non_empty_header(req, X_REAL_IP) {
        return ip.to_string();
    }

    if let Some(forwarded) = non_empty_header(req, X_FORWARDED_FOR) {
        // Returned whole: a proxy chain stays "client, proxy1, ...".
        return forwarded.to_string();
    }

    let addr = req.remote_addr();
    match split_host_port(addr) {
        Ok((host, _)) => host.to_string(),
        Err(HostPortError::MissingPort) => bare_host(addr).unwrap_or(LOOPBACK).to_string(),
        // A bare IPv6 literal has "too many colons" but is still an address.
        Err(HostPortError::TooManyColons) if addr.parse::<Ipv6Addr>().is_ok() => addr.to_string(),
        Err(_) => LOOPBACK.to_string(),
    }
}

fn non_empty_header<'a, R: ClientAddrSource + ?Sized>(req: &'a R, name: &str) -> Option<&'a str> {
    req.header(name).map(str::trim).filter(|v| !v.is_empty())
}

/// Returns the address itself when it is a host without a port.
///
/// `[::1]` is unwrapped to `::1`; anything else containing brackets is
/// malformed.
fn bare_host(addr: &str) -> Option<&str> {
    if addr.is_empty() {
        return None;
    }
    if let Some(inner) = addr.strip_prefix('[').and_then(|a| a.strip_suffix(']')) {
        if inner.is_empty() || inner.contains(['[', ']']) {
            return None;
        }
        return Some(inner);
    }
    if addr.contains(['[', ']']) {
        return None;
    }
    Some(addr)
}

/// Splits `host:port` or `[host]:port` into its host and port parts.
///
/// The host of a bracketed address is returned without brackets.  Either
/// part may be empty (`":80"` yields host `""`).
///
/// # Errors
///
/// Returns a [`HostPortError`] when the string has no port separator, an
/// unbracketed host containing colons, or unbalanced brackets.
pub fn split_host_port(hostport: &str) -> Result<(&str, &str), HostPortError> {
    let colon = hostport.rfind(':').ok_or(HostPortError::MissingPort)?;

    let (host, host_start, host_end) = if hostport.starts_with('[') {
        let close = hostport
            .find(']')
            .ok_or(HostPortError::MissingClosingBracket)?;
        if close + 1 == hostport.len() {
            return Err(HostPortError::MissingPort);
        }
        if close + 1 != colon {
            // Something other than the final ':' follows ']'.
            return Err(if hostport.as_bytes()[close + 1] == b':' {
                HostPortError::TooManyColons
            } else {
                HostPortError::MissingPort
            });
        }
        (&hostport[1..close], 1, close + 1)
    } else {
        let host = &hostport[..colon];
        if host.contains(':') {
            return Err(HostPortError::TooManyColons);
        }
        (host, 0, 0)
    };

    if hostport[host_start..].contains('[') {
        return Err(HostPortError::UnexpectedOpeningBracket);
    }
    if hostport[host_end..].contains(']') {
        return Err(HostPortError::UnexpectedClosingBracket);
    }

    Ok((host, &hostport[colon + 1..]))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const IP: &str = "123.456.7.8";

    #[test]
    fn test_real_ip_header_wins() {
        let req = RequestMeta::new("10.1.1.1:4000").with_header("X-Real-Ip", IP);
        assert_eq!(remote_ip(&req), IP);
    }

    #[test]
    fn test_real_ip_header_wins_over_forwarded_for() {
        let req = RequestMeta::new("10.1.1.1:4000")
            .with_header("X-Forwarded-For", "9.9.9.9")
            .with_header("X-Real-Ip", IP);
        assert_eq!(remote_ip(&req), IP);
    }

    #[test]
    fn test_forwarded_for_used_without_real_ip() {
        let req = RequestMeta::new("10.1.1.1:4000").with_header("X-Forwarded-For", IP);
        assert_eq!(remote_ip(&req), IP);
    }

    #[test]
    fn test_forwarded_for_list_is_returned_unchanged() {
        let req = RequestMeta::new("10.1.1.1:4000")
            .with_header("X-Forwarded-For", " 203.0.113.5, 10.0.0.2, 10.0.0.3 ");
        assert_eq!(remote_ip(&req), "203.0.113.5, 10.0.0.2, 10.0.0.3");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = RequestMeta::new("").with_header("x-real-ip", IP);
        assert_eq!(remote_ip(&req), IP);
    }

    #[test]
    fn test_empty_header_counts_as_absent() {
        let req = RequestMeta::new("10.1.1.1:4000").with_header("X-Real-Ip", "  ");
        assert_eq!(remote_ip(&req), "10.1.1.1");
    }

    #[test]
    fn test_remote_addr_without_port_is_returned_whole() {
        let req = RequestMeta::new(IP);
        assert_eq!(remote_ip(&req), IP);
    }

    #[test]
    fn test_remote_addr_host_port_yields_host() {
        let req = RequestMeta::new("192.168.0.10:8080");
        assert_eq!(remote_ip(&req), "192.168.0.10");
    }

    #[test]
    fn test_bracketed_ipv6_remote_addr() {
        assert_eq!(remote_ip(&RequestMeta::new("[::1]:443")), "::1");
        assert_eq!(remote_ip(&RequestMeta::new("[fe80::1]")), "fe80::1");
    }

    #[test]
    fn test_bare_ipv6_remote_addr() {
        assert_eq!(remote_ip(&RequestMeta::new("2001:db8::7")), "2001:db8::7");
    }

    #[test]
    fn test_malformed_remote_addr_falls_back_to_loopback() {
        let req = RequestMeta::new("[");
        assert_eq!(remote_ip(&req), LOOPBACK);
    }

    #[test]
    fn test_other_malformed_remote_addrs_fall_back_to_loopback() {
        for addr in ["", "[]", "a]:80", "[::1", "x:y:z", "[::1]x:80"] {
            assert_eq!(remote_ip(&RequestMeta::new(addr)), LOOPBACK, "addr {addr:?}");
        }
    }

    #[test]
    fn test_split_host_port_ipv4() {
        assert_eq!(split_host_port("1.2.3.4:80"), Ok(("1.2.3.4", "80")));
    }

    #[test]
    fn test_split_host_port_empty_host() {
        assert_eq!(split_host_port(":1337"), Ok(("", "1337")));
    }

    #[test]
    fn test_split_host_port_errors() {
        assert_eq!(split_host_port("host"), Err(HostPortError::MissingPort));
        assert_eq!(split_host_port("["), Err(HostPortError::MissingPort));
        assert_eq!(split_host_port("[::1"), Err(HostPortError::MissingClosingBracket));
        assert_eq!(split_host_port("[::1]"), Err(HostPortError::MissingPort));
        assert_eq!(split_host_port("[::1]::80"), Err(HostPortError::TooManyColons));
        assert_eq!(split_host_port("a:b:c"), Err(HostPortError::TooManyColons));
        assert_eq!(split_host_port("a[b:80"), Err(HostPortError::UnexpectedOpeningBracket));
        assert_eq!(split_host_port("ab]:80"), Err(HostPortError::UnexpectedClosingBracket));
    }

    #[test]
    fn test_request_meta_setters() {
        let mut req = RequestMeta::default();
        req.push_header("Host", "example.com");
        req.set_remote_addr("10.0.0.1:1");
        assert_eq!(req.header("host"), Some("example.com"));
        assert_eq!(req.header_count(), 1);
        assert_eq!(req.remote_addr(), "10.0.0.1:1");
    }
}
