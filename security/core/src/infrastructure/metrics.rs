// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Security metrics. Counters and gauges are kept in a mutex-guarded struct
// (snapshots returned by copy, for tests and introspection) and mirrored to
// the `metrics` facade so the process-wide Prometheus recorder exports them.
// Counter names carry the `_total` suffix; gauges do not.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::domain::access::ResourceType;
use crate::domain::error::SecurityError;

/// Install the process-wide Prometheus recorder. Everything this crate
/// emits through the `metrics` facade becomes scrapeable via the returned
/// handle's `render()`. Installing twice in one process fails; hosts that
/// already own a recorder skip this.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, SecurityError> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| SecurityError::Config(format!("prometheus recorder install failed: {e}")))
}

/// Copyable view of every counter and gauge the core maintains.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub access_granted: u64,
    pub access_denied: u64,
    pub sandbox_created: u64,
    pub sandbox_failed: u64,
    pub sandbox_fallback: u64,
    pub rate_limit_hits: u64,
    pub audit_events_logged: u64,
    pub audit_events_dropped: u64,
    pub profile_switches: u64,
    /// Requests seen per resource class (file / network / command).
    pub requests_by_resource: HashMap<&'static str, u64>,

    pub sandbox_available: bool,
    pub sandbox_latency_ms: f64,
    pub audit_buffer_used: f64,
    pub audit_buffer_capacity: f64,
    pub active_profile: String,
    /// Unix seconds of the most recent audit event.
    pub last_event_timestamp: f64,
}

/// Process-wide collector owned by the policy manager.
#[derive(Debug)]
pub struct MetricsCollector {
    namespace: String,
    inner: Mutex<MetricsSnapshot>,
}

impl MetricsCollector {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    fn counter_name(&self, name: &str) -> String {
        format!("{}_{name}_total", self.namespace)
    }

    fn gauge_name(&self, name: &str) -> String {
        format!("{}_{name}", self.namespace)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().clone()
    }

    pub fn record_access(&self, resource_type: ResourceType, allowed: bool) {
        let mut inner = self.inner.lock();
        if allowed {
            inner.access_granted += 1;
            counter!(self.counter_name("access_granted")).increment(1);
        } else {
            inner.access_denied += 1;
            counter!(self.counter_name("access_denied")).increment(1);
        }
        *inner
            .requests_by_resource
            .entry(resource_type.as_str())
            .or_insert(0) += 1;
        counter!(
            self.counter_name("requests"),
            "resource_type" => resource_type.as_str()
        )
        .increment(1);
    }

    pub fn record_sandbox_created(&self, factory: &'static str, latency_ms: f64) {
        let mut inner = self.inner.lock();
        inner.sandbox_created += 1;
        inner.sandbox_available = true;
        inner.sandbox_latency_ms = latency_ms;
        counter!(self.counter_name("sandbox_created"), "factory" => factory).increment(1);
        gauge!(self.gauge_name("sandbox_available")).set(1.0);
        gauge!(self.gauge_name("sandbox_latency_ms")).set(latency_ms);
    }

    pub fn record_sandbox_failed(&self) {
        let mut inner = self.inner.lock();
        inner.sandbox_failed += 1;
        inner.sandbox_available = false;
        counter!(self.counter_name("sandbox_failed")).increment(1);
        gauge!(self.gauge_name("sandbox_available")).set(0.0);
    }

    pub fn record_sandbox_fallback(&self) {
        self.inner.lock().sandbox_fallback += 1;
        counter!(self.counter_name("sandbox_fallback")).increment(1);
    }

    pub fn record_rate_limit_hit(&self) {
        self.inner.lock().rate_limit_hits += 1;
        counter!(self.counter_name("rate_limit_hits")).increment(1);
    }

    pub fn record_audit_logged(&self, buffer_used: f64, buffer_capacity: f64) {
        let mut inner = self.inner.lock();
        inner.audit_events_logged += 1;
        inner.audit_buffer_used = buffer_used;
        inner.audit_buffer_capacity = buffer_capacity;
        inner.last_event_timestamp = chrono::Utc::now().timestamp() as f64;
        counter!(self.counter_name("audit_events_logged")).increment(1);
        gauge!(self.gauge_name("audit_buffer_used")).set(buffer_used);
        gauge!(self.gauge_name("audit_buffer_capacity")).set(buffer_capacity);
        gauge!(self.gauge_name("last_event_timestamp")).set(inner.last_event_timestamp);
    }

    pub fn record_audit_dropped(&self) {
        self.inner.lock().audit_events_dropped += 1;
        counter!(self.counter_name("audit_events_dropped")).increment(1);
    }

    pub fn record_profile_switch(&self, profile: &str) {
        let mut inner = self.inner.lock();
        inner.profile_switches += 1;
        inner.active_profile = profile.to_string();
        counter!(self.counter_name("profile_switches")).increment(1);
        gauge!(self.gauge_name("active_profile"), "profile" => profile.to_string()).set(1.0);
    }
}
