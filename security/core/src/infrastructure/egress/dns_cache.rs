// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Resolution cache with rebind detection. Entries are immutable after
//! insert and live for a configurable TTL (default 30 s); a lookup past the
//! TTL re-resolves and replaces the entry wholesale. Because the egress
//! dialer is pinned to the addresses captured here, a record that changes
//! between validation and connect cannot redirect the dial.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::domain::error::SecurityError;

#[derive(Debug, Clone)]
pub struct DnsCacheEntry {
    pub ips: Vec<IpAddr>,
    pub captured_at: Instant,
}

pub struct DnsCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, DnsCacheEntry>>,
}

impl DnsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve through the cache. Fresh entries are served as captured;
    /// stale or absent hostnames go to the system resolver and the result
    /// replaces the entry.
    pub async fn resolve(&self, host: &str, port: u16) -> Result<Vec<IpAddr>, SecurityError> {
        let key = host.to_ascii_lowercase();
        if let Some(entry) = self.fresh_entry(&key) {
            return Ok(entry.ips);
        }

        let ips = system_lookup(host, port).await?;
        self.entries.write().insert(
            key,
            DnsCacheEntry {
                ips: ips.clone(),
                captured_at: Instant::now(),
            },
        );
        Ok(ips)
    }

    /// Compare a fresh resolution against the cached one. A mismatch while
    /// the cached entry is still live is the rebind signature and fails the
    /// dial.
    pub async fn check_rebind(&self, host: &str, port: u16) -> Result<(), SecurityError> {
        let key = host.to_ascii_lowercase();
        let Some(cached) = self.fresh_entry(&key) else {
            return Ok(());
        };
        let mut current = system_lookup(host, port).await?;
        let mut captured = cached.ips;
        current.sort_unstable();
        captured.sort_unstable();
        if current != captured {
            return Err(SecurityError::SecurityBlocked(
                "DNS answer changed between validation and connect".into(),
            ));
        }
        Ok(())
    }

    /// Test hook and administrative seed: install a resolution directly.
    pub fn insert(&self, host: &str, ips: Vec<IpAddr>) {
        self.entries.write().insert(
            host.to_ascii_lowercase(),
            DnsCacheEntry {
                ips,
                captured_at: Instant::now(),
            },
        );
    }

    pub fn cached(&self, host: &str) -> Option<Vec<IpAddr>> {
        self.fresh_entry(&host.to_ascii_lowercase()).map(|e| e.ips)
    }

    fn fresh_entry(&self, key: &str) -> Option<DnsCacheEntry> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.captured_at.elapsed() < self.ttl {
            Some(entry.clone())
        } else {
            None
        }
    }
}

async fn system_lookup(host: &str, port: u16) -> Result<Vec<IpAddr>, SecurityError> {
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| SecurityError::Network(format!("DNS resolution failed: {e}")))?;
    let ips: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
    if ips.is_empty() {
        return Err(SecurityError::Network("DNS returned no addresses".into()));
    }
    Ok(ips)
}
