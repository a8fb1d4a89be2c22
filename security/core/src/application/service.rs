// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Process-level assembly of the security core: one manager, one audit
// pipeline, one metrics collector, one DNS monitor, shared by every
// workflow context the host runtime creates.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::SecurityConfig;
use crate::domain::error::SecurityError;
use crate::infrastructure::audit::AuditPipeline;
use crate::infrastructure::dns_monitor::DnsQueryMonitor;
use crate::infrastructure::egress::{HttpEgressConfig, HttpEgressGuard};
use crate::infrastructure::metrics::{install_prometheus_recorder, MetricsCollector};
use metrics_exporter_prometheus::PrometheusHandle;
use crate::infrastructure::sandbox::container::ContainerSandboxFactory;
use crate::infrastructure::sandbox::process::ProcessSandboxFactory;
use crate::infrastructure::sandbox::SandboxFactory;

use super::interceptor::ToolInterceptor;
use super::override_manager::spawn_override_sweeper;
use super::policy_manager::PolicyManager;
use super::workflow_context::WorkflowSecurityContext;

pub struct SecurityService {
    manager: Arc<PolicyManager>,
    interceptor: Arc<ToolInterceptor>,
    audit: Arc<AuditPipeline>,
    metrics: Arc<MetricsCollector>,
    dns_monitor: Arc<DnsQueryMonitor>,
    egress: Arc<HttpEgressGuard>,
    factories: Vec<Arc<dyn SandboxFactory>>,
    prewarm: bool,
    sweeper: CancellationToken,
    prometheus: Option<PrometheusHandle>,
}

impl SecurityService {
    /// Wire the whole core from validated configuration. Fail-closed: any
    /// invalid profile or audit destination aborts startup.
    pub fn build(config: &SecurityConfig) -> Result<Arc<Self>, SecurityError> {
        let metrics = Arc::new(MetricsCollector::new(config.metrics.namespace.clone()));
        let audit = Arc::new(AuditPipeline::start(&config.audit, metrics.clone())?);
        let manager = Arc::new(PolicyManager::build(config, audit.clone(), metrics.clone())?);
        let interceptor = Arc::new(ToolInterceptor::new(manager.clone(), audit.clone()));
        let dns_monitor =
            Arc::new(DnsQueryMonitor::new(config.dns.clone()).with_metrics(metrics.clone()));
        let egress = Arc::new(HttpEgressGuard::new(
            HttpEgressConfig::default(),
            dns_monitor.clone(),
            config.dns.cache_ttl,
        ));

        let mut factories: Vec<Arc<dyn SandboxFactory>> = Vec::new();
        match ContainerSandboxFactory::new(None) {
            Ok(factory) => factories.push(Arc::new(factory)),
            Err(e) => info!(error = %e, "container sandbox backend unavailable"),
        }
        factories.push(Arc::new(ProcessSandboxFactory));

        let prometheus = if config.metrics.enabled {
            match install_prometheus_recorder() {
                Ok(handle) => Some(handle),
                // The host may already own a recorder; the facade still
                // routes our counters there.
                Err(e) => {
                    info!(error = %e, "using existing metrics recorder");
                    None
                }
            }
        } else {
            None
        };

        let sweeper = spawn_override_sweeper(manager.overrides().clone());
        Ok(Arc::new(Self {
            manager,
            interceptor,
            audit,
            metrics,
            dns_monitor,
            egress,
            factories,
            prewarm: config.prewarm_sandbox,
            sweeper,
            prometheus,
        }))
    }

    pub fn manager(&self) -> &Arc<PolicyManager> {
        &self.manager
    }

    pub fn interceptor(&self) -> &Arc<ToolInterceptor> {
        &self.interceptor
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn dns_monitor(&self) -> &Arc<DnsQueryMonitor> {
        &self.dns_monitor
    }

    pub fn egress(&self) -> &Arc<HttpEgressGuard> {
        &self.egress
    }

    /// Prometheus exposition, when this service installed the recorder.
    pub fn render_metrics(&self) -> Option<String> {
        self.prometheus.as_ref().map(|h| h.render())
    }

    /// New per-workflow context carrying a copy of the active profile.
    pub fn create_workflow_context(&self, workflow_id: &str) -> Arc<WorkflowSecurityContext> {
        Arc::new(WorkflowSecurityContext::new(
            workflow_id,
            self.manager.active_profile(),
            self.factories.clone(),
            self.prewarm,
            self.audit.clone(),
            self.metrics.clone(),
        ))
    }

    /// Stop the background tasks and flush the audit pipeline.
    pub async fn shutdown(&self) -> Result<(), SecurityError> {
        self.sweeper.cancel();
        self.audit.close().await
    }
}
