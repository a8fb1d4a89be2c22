// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Host pattern matching: exact hosts, `*.domain` wildcards, `host:port`
//! pairs, and CIDR blocks.

use ipnet::IpNet;
use std::net::IpAddr;
use std::str::FromStr;

/// Match a single network pattern against a `(host, port)` pair.
///
/// - `example.com` matches exactly that host, any port.
/// - `*.example.com` matches `api.example.com` but neither `example.com`
///   itself nor `evil-example.com`.
/// - `example.com:443` additionally pins the port.
/// - `10.0.0.0/8` matches when the host parses as an address in the block.
pub fn matches_host(pattern: &str, host: &str, port: Option<u16>) -> bool {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return false;
    }

    // CIDR block
    if let Ok(net) = IpNet::from_str(pattern) {
        return match IpAddr::from_str(host) {
            Ok(ip) => net.contains(&ip),
            Err(_) => false,
        };
    }

    // host:port
    if let Some((host_part, required)) = split_host_port(pattern) {
        return match port {
            Some(p) if p == required => matches_bare_host(host_part, host),
            _ => false,
        };
    }

    matches_bare_host(pattern, host)
}

/// Match against a list of patterns.
pub fn matches_any_host<'a>(
    patterns: &'a [String],
    host: &str,
    port: Option<u16>,
) -> Option<&'a str> {
    patterns
        .iter()
        .find(|p| matches_host(p, host, port))
        .map(|s| s.as_str())
}

fn matches_bare_host(pattern: &str, host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();

    if let Some(domain) = pattern.strip_prefix("*.") {
        // Strictly a subdomain: `x.domain.tld`, never `domain.tld` itself and
        // never a lookalike suffix such as `evil-domain.tld`.
        return host.len() > domain.len() + 1
            && host.ends_with(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.';
    }
    host == pattern
}

/// Split `host:port` when the suffix is a valid port number. IPv6 literals
/// and CIDR text (handled earlier) never reach the port branch because their
/// colon suffixes do not parse as a lone port.
fn split_host_port(pattern: &str) -> Option<(&str, u16)> {
    let (host_part, port_part) = pattern.rsplit_once(':')?;
    if host_part.contains(':') {
        // More than one colon: an IPv6 literal, not a host:port pair.
        return None;
    }
    port_part.parse::<u16>().ok().map(|p| (host_part, p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_host() {
        assert!(matches_host("api.example.com", "api.example.com", Some(443)));
        assert!(matches_host("API.Example.COM", "api.example.com", None));
        assert!(!matches_host("api.example.com", "api.example.org", None));
    }

    #[test]
    fn test_wildcard_strict_subdomain() {
        assert!(matches_host("*.example.com", "api.example.com", None));
        assert!(matches_host("*.example.com", "a.b.example.com", None));
        assert!(!matches_host("*.example.com", "example.com", None));
        assert!(!matches_host("*.example.com", "evil-example.com", None));
        assert!(!matches_host("*.x.com", "x.com", None));
        assert!(!matches_host("*.x.com", "evil-x.com", None));
    }

    #[test]
    fn test_host_port_pinning() {
        assert!(matches_host("example.com:443", "example.com", Some(443)));
        assert!(!matches_host("example.com:443", "example.com", Some(8443)));
        assert!(!matches_host("example.com:443", "example.com", None));
        // No-port pattern ignores the port entirely.
        assert!(matches_host("example.com", "example.com", Some(8443)));
    }

    #[test]
    fn test_cidr() {
        assert!(matches_host("10.0.0.0/8", "10.20.30.40", None));
        assert!(!matches_host("10.0.0.0/8", "11.0.0.1", None));
        assert!(matches_host("fd00::/8", "fd00::1", None));
        assert!(!matches_host("10.0.0.0/8", "not-an-ip.example.com", None));
    }

    #[test]
    fn test_matches_any() {
        let patterns = vec![
            "*.github.com".to_string(),
            "api.anthropic.com".to_string(),
            "192.168.0.0/16".to_string(),
        ];
        assert_eq!(
            matches_any_host(&patterns, "raw.github.com", Some(443)),
            Some("*.github.com")
        );
        assert_eq!(
            matches_any_host(&patterns, "192.168.1.5", None),
            Some("192.168.0.0/16")
        );
        assert_eq!(matches_any_host(&patterns, "github.com", None), None);
    }
}
