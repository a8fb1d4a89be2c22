// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! DNS query monitor: pre-query heuristics against tunneling and
//! exfiltration. Checks run in a fixed order — allowlist escape hatch,
//! dynamic-DNS blocklist, subdomain depth, label length, per-hostname query
//! rate. All checks are pure string and clock work; nothing here resolves
//! names, so the hot path stays well under the latency budget.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::DnsSecurityConfig;
use crate::domain::error::SecurityError;
use crate::infrastructure::metrics::MetricsCollector;

const RATE_WINDOW: Duration = Duration::from_secs(60);
const HISTORY_RETENTION: Duration = Duration::from_secs(5 * 60);

/// Per-hostname record of recent query instants, pruned to the trailing
/// five minutes.
type QueryHistory = HashMap<String, VecDeque<Instant>>;

pub struct DnsQueryMonitor {
    config: DnsSecurityConfig,
    history: Mutex<QueryHistory>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl DnsQueryMonitor {
    pub fn new(config: DnsSecurityConfig) -> Self {
        Self {
            config,
            history: Mutex::new(HashMap::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate a hostname before any resolution is attempted.
    ///
    /// Allowlisted hostnames (and their subdomains) skip every check. A
    /// passing query is recorded against the rate window; a rejected one is
    /// not.
    pub fn validate_query(&self, hostname: &str) -> Result<(), SecurityError> {
        if !self.config.enabled {
            return Ok(());
        }
        let hostname = hostname.trim_end_matches('.').to_ascii_lowercase();
        if hostname.is_empty() {
            return Err(SecurityError::Validation("empty hostname".into()));
        }

        if self.is_allowlisted(&hostname) {
            return Ok(());
        }

        if let Some(suffix) = self.matches_blocklist(&hostname) {
            return Err(SecurityError::SecurityBlocked(format!(
                "hostname matches dynamic-DNS blocklist entry {suffix}"
            )));
        }

        // Depth counts every non-empty label: `api.example.com` is 3.
        let depth = hostname.split('.').filter(|l| !l.is_empty()).count();
        if depth > self.config.max_subdomain_depth {
            return Err(SecurityError::SecurityBlocked(format!(
                "subdomain depth {depth} exceeds limit {}",
                self.config.max_subdomain_depth
            )));
        }

        if let Some(label) = hostname
            .split('.')
            .find(|l| l.len() > self.config.max_label_length)
        {
            return Err(SecurityError::SecurityBlocked(format!(
                "DNS label of {} bytes exceeds limit {}",
                label.len(),
                self.config.max_label_length
            )));
        }

        self.check_and_record_rate(&hostname)
    }

    fn is_allowlisted(&self, hostname: &str) -> bool {
        self.config.allowlist.iter().any(|entry| {
            let entry = entry.trim_end_matches('.').to_ascii_lowercase();
            hostname == entry || hostname.ends_with(&format!(".{entry}"))
        })
    }

    fn matches_blocklist(&self, hostname: &str) -> Option<&str> {
        self.config
            .blocked_suffixes
            .iter()
            .find(|suffix| hostname.ends_with(&suffix.to_ascii_lowercase()))
            .map(|s| s.as_str())
    }

    /// Prune stale entries *before* comparing against the limit, then record
    /// the accepted query.
    fn check_and_record_rate(&self, hostname: &str) -> Result<(), SecurityError> {
        let now = Instant::now();
        let mut history = self.history.lock();
        let entry = history.entry(hostname.to_string()).or_default();

        while entry
            .front()
            .is_some_and(|t| now.duration_since(*t) >= RATE_WINDOW)
        {
            entry.pop_front();
        }

        if entry.len() >= self.config.max_queries_per_minute {
            if let Some(metrics) = &self.metrics {
                metrics.record_rate_limit_hit();
            }
            return Err(SecurityError::RateLimit(format!(
                "{} DNS queries for one hostname in the last minute (limit {})",
                entry.len(),
                self.config.max_queries_per_minute
            )));
        }

        entry.push_back(now);
        Ok(())
    }

    /// Drop hostnames with no queries in the last five minutes. Callable by
    /// the host runtime on its own cadence; not scheduled here.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut history = self.history.lock();
        history.retain(|_, entries| {
            while entries
                .front()
                .is_some_and(|t| now.duration_since(*t) >= HISTORY_RETENTION)
            {
                entries.pop_front();
            }
            !entries.is_empty()
        });
    }

    /// Number of hostnames currently tracked (observability hook).
    pub fn tracked_hostnames(&self) -> usize {
        self.history.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor_with(config: DnsSecurityConfig) -> DnsQueryMonitor {
        DnsQueryMonitor::new(config)
    }

    #[test]
    fn test_blocklist_suffix_match() {
        let monitor = monitor_with(DnsSecurityConfig::default());
        let err = monitor.validate_query("exfil.duckdns.org").unwrap_err();
        assert!(err.to_string().contains("blocklist"));
        // Case-insensitive
        assert!(monitor.validate_query("EXFIL.DuckDNS.ORG").is_err());
    }

    #[test]
    fn test_allowlist_escapes_blocklist() {
        let config = DnsSecurityConfig {
            allowlist: vec!["build.ngrok.io".to_string()],
            ..DnsSecurityConfig::default()
        };
        let monitor = monitor_with(config);
        assert!(monitor.validate_query("build.ngrok.io").is_ok());
        assert!(monitor.validate_query("ci.build.ngrok.io").is_ok());
        assert!(monitor.validate_query("other.ngrok.io").is_err());
    }

    #[test]
    fn test_subdomain_depth_boundary() {
        let config = DnsSecurityConfig {
            max_subdomain_depth: 3,
            ..DnsSecurityConfig::default()
        };
        let monitor = monitor_with(config);
        // Exactly at the limit: accepted.
        assert!(monitor.validate_query("api.example.com").is_ok());
        // One past: rejected, and the message names the check.
        let err = monitor.validate_query("a.b.c.d.example.com").unwrap_err();
        assert!(err.to_string().contains("subdomain depth"));
        assert!(monitor.validate_query("x.api.example.com").is_err());
    }

    #[test]
    fn test_label_length_cap() {
        let monitor = monitor_with(DnsSecurityConfig::default());
        let long_label = "a".repeat(64);
        let err = monitor
            .validate_query(&format!("{long_label}.example.com"))
            .unwrap_err();
        assert!(err.to_string().contains("label"));
        let max_label = "a".repeat(63);
        assert!(monitor.validate_query(&format!("{max_label}.example.com")).is_ok());
    }

    #[test]
    fn test_rate_limit_per_hostname() {
        let config = DnsSecurityConfig {
            max_queries_per_minute: 5,
            ..DnsSecurityConfig::default()
        };
        let monitor = monitor_with(config);
        for _ in 0..5 {
            monitor.validate_query("api.example.com").unwrap();
        }
        let err = monitor.validate_query("api.example.com").unwrap_err();
        assert!(matches!(err, SecurityError::RateLimit(_)));
        // A different hostname has its own window.
        assert!(monitor.validate_query("other.example.com").is_ok());
    }

    #[test]
    fn test_rate_limit_hits_counted() {
        let config = DnsSecurityConfig {
            max_queries_per_minute: 1,
            ..DnsSecurityConfig::default()
        };
        let metrics = Arc::new(MetricsCollector::new("conductor_security"));
        let monitor = DnsQueryMonitor::new(config).with_metrics(metrics.clone());
        monitor.validate_query("api.example.com").unwrap();
        let _ = monitor.validate_query("api.example.com");
        let _ = monitor.validate_query("api.example.com");
        assert_eq!(metrics.snapshot().rate_limit_hits, 2);
    }

    #[test]
    fn test_rejected_queries_not_recorded() {
        let config = DnsSecurityConfig {
            max_queries_per_minute: 1,
            max_subdomain_depth: 2,
            ..DnsSecurityConfig::default()
        };
        let monitor = monitor_with(config);
        // Depth rejections happen before rate accounting.
        for _ in 0..3 {
            assert!(monitor.validate_query("a.b.example.com").is_err());
        }
        assert!(monitor.validate_query("example.com").is_ok());
    }

    #[test]
    fn test_cleanup_drops_idle_hostnames() {
        let monitor = monitor_with(DnsSecurityConfig::default());
        monitor.validate_query("api.example.com").unwrap();
        assert_eq!(monitor.tracked_hostnames(), 1);
        // Entries are recent, cleanup keeps them.
        monitor.cleanup();
        assert_eq!(monitor.tracked_hostnames(), 1);
    }

    #[test]
    fn test_disabled_monitor_allows_everything() {
        let config = DnsSecurityConfig {
            enabled: false,
            ..DnsSecurityConfig::default()
        };
        let monitor = monitor_with(config);
        assert!(monitor.validate_query("x.duckdns.org").is_ok());
    }

    #[test]
    fn test_trailing_dot_normalized() {
        let monitor = monitor_with(DnsSecurityConfig::default());
        assert!(monitor.validate_query("tunnel.ngrok.io.").is_err());
    }
}
