// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Per-workflow security state. Each workflow owns exactly one context,
//! carrying a copy of the profile that was active at creation time, a lazily
//! materialized sandbox, and a degraded flag. The sandbox factory chain is
//! container first, process fallback second; if neither is available the
//! context runs degraded and enforcement rests on the interceptor alone.
//!
//! ```text
//! Created --(sandbox demanded)--> Initializing
//! Initializing --container factory--> Ready(container)
//! Initializing --fallback factory---> Ready(process, degraded)
//! Initializing --none available-----> Degraded
//! Ready | Degraded --cleanup--> Terminated
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::error::SecurityError;
use crate::domain::event::{EventType, SecurityEvent};
use crate::domain::profile::{IsolationMode, SecurityProfile};
use crate::infrastructure::audit::AuditPipeline;
use crate::infrastructure::metrics::MetricsCollector;
use crate::infrastructure::sandbox::{Sandbox, SandboxFactory, SandboxKind, SandboxSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Ready,
    Degraded,
    Terminated,
}

struct ContextState {
    phase: Phase,
    sandbox: Option<Arc<dyn Sandbox>>,
}

pub struct WorkflowSecurityContext {
    workflow_id: String,
    profile: SecurityProfile,
    prewarm: bool,
    factories: Vec<Arc<dyn SandboxFactory>>,
    state: Mutex<ContextState>,
    degraded: AtomicBool,
    cleaned: AtomicBool,
    audit: Arc<AuditPipeline>,
    metrics: Arc<MetricsCollector>,
}

impl WorkflowSecurityContext {
    pub fn new(
        workflow_id: impl Into<String>,
        profile: SecurityProfile,
        factories: Vec<Arc<dyn SandboxFactory>>,
        prewarm: bool,
        audit: Arc<AuditPipeline>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            profile,
            prewarm,
            factories,
            state: Mutex::new(ContextState {
                phase: Phase::Created,
                sandbox: None,
            }),
            degraded: AtomicBool::new(false),
            cleaned: AtomicBool::new(false),
            audit,
            metrics,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// The profile captured at context creation. A later profile switch on
    /// the manager does not affect this copy.
    pub fn profile(&self) -> &SecurityProfile {
        &self.profile
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Run the eager half of the lifecycle: start the sandbox now when
    /// prewarming is on, so the first tool call does not pay container
    /// start latency.
    pub async fn init(&self) -> Result<(), SecurityError> {
        if self.prewarm && self.profile.isolation == IsolationMode::Sandbox {
            self.sandbox().await?;
        }
        Ok(())
    }

    /// The workflow's sandbox, created on first demand. `Ok(None)` means
    /// policy does not require one, or the context is running degraded.
    pub async fn sandbox(&self) -> Result<Option<Arc<dyn Sandbox>>, SecurityError> {
        if self.profile.isolation != IsolationMode::Sandbox {
            return Ok(None);
        }

        let mut state = self.state.lock().await;
        match state.phase {
            Phase::Terminated => {
                return Err(SecurityError::Validation(format!(
                    "workflow {} context is terminated",
                    self.workflow_id
                )))
            }
            Phase::Ready => return Ok(state.sandbox.clone()),
            Phase::Degraded => return Ok(None),
            Phase::Created => {}
        }

        // Initializing: try factories in declared order (container first).
        let spec = SandboxSpec::for_workflow(self.workflow_id.clone(), self.profile.limits.clone());
        for (index, factory) in self.factories.iter().enumerate() {
            if !factory.is_available().await {
                continue;
            }
            let started = Instant::now();
            match factory.create(&spec).await {
                Ok(sandbox) => {
                    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                    let sandbox: Arc<dyn Sandbox> = Arc::from(sandbox);
                    let is_fallback = index > 0 || factory.kind() != SandboxKind::Container;

                    self.metrics
                        .record_sandbox_created(factory.kind().as_str(), latency_ms);
                    self.audit.log(
                        SecurityEvent::new(EventType::AccessGranted, "allowed")
                            .workflow(self.workflow_id.clone(), "")
                            .resource("sandbox", sandbox.id())
                            .action("create")
                            .reason(format!("{} sandbox created", factory.kind().as_str()))
                            .profile(self.profile.name.clone()),
                    );

                    if is_fallback {
                        self.degraded.store(true, Ordering::Release);
                        self.metrics.record_sandbox_fallback();
                        self.audit.log(
                            SecurityEvent::new(EventType::Violation, "degraded")
                                .workflow(self.workflow_id.clone(), "")
                                .resource("sandbox", sandbox.id())
                                .reason("container backend unavailable, using process isolation")
                                .profile(self.profile.name.clone()),
                        );
                        warn!(
                            workflow = %self.workflow_id,
                            backend = factory.kind().as_str(),
                            "sandbox running on fallback backend"
                        );
                    }

                    state.sandbox = Some(sandbox.clone());
                    state.phase = Phase::Ready;
                    return Ok(Some(sandbox));
                }
                Err(e) => {
                    self.metrics.record_sandbox_failed();
                    warn!(
                        workflow = %self.workflow_id,
                        backend = factory.kind().as_str(),
                        error = %e,
                        "sandbox factory failed, trying next"
                    );
                }
            }
        }

        // No factory produced a sandbox: degraded operation, policy checks
        // are the only containment.
        state.phase = Phase::Degraded;
        self.degraded.store(true, Ordering::Release);
        self.metrics.record_sandbox_failed();
        self.audit.log(
            SecurityEvent::new(EventType::Violation, "degraded")
                .workflow(self.workflow_id.clone(), "")
                .resource("sandbox", "none")
                .reason("no sandbox backend available, enforcement is policy-only")
                .profile(self.profile.name.clone()),
        );
        Ok(None)
    }

    /// Tear down the context. Idempotent; the first call destroys the
    /// sandbox, later calls return immediately.
    pub async fn cleanup(&self) -> Result<(), SecurityError> {
        if self.cleaned.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        state.phase = Phase::Terminated;
        if let Some(sandbox) = state.sandbox.take() {
            sandbox.destroy().await?;
            info!(workflow = %self.workflow_id, "workflow sandbox destroyed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::infrastructure::sandbox::SandboxOutput;

    struct FakeSandbox {
        id: String,
        kind: SandboxKind,
        destroyed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Sandbox for FakeSandbox {
        fn id(&self) -> &str {
            &self.id
        }
        fn kind(&self) -> SandboxKind {
            self.kind
        }
        async fn execute(
            &self,
            _command: &[String],
            _timeout: Duration,
        ) -> Result<SandboxOutput, SecurityError> {
            Ok(SandboxOutput::default())
        }
        async fn destroy(&self) -> Result<(), SecurityError> {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeFactory {
        kind: SandboxKind,
        available: bool,
        fail_create: bool,
        created: Arc<AtomicUsize>,
        destroyed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SandboxFactory for FakeFactory {
        fn kind(&self) -> SandboxKind {
            self.kind
        }
        async fn is_available(&self) -> bool {
            self.available
        }
        async fn create(&self, spec: &SandboxSpec) -> Result<Box<dyn Sandbox>, SecurityError> {
            if self.fail_create {
                return Err(SecurityError::Config("backend down".into()));
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSandbox {
                id: format!("{}-{}", self.kind.as_str(), spec.workflow_id),
                kind: self.kind,
                destroyed: self.destroyed.clone(),
            }))
        }
    }

    fn factory(kind: SandboxKind, available: bool, fail_create: bool) -> (Arc<FakeFactory>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let destroyed = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(FakeFactory {
                kind,
                available,
                fail_create,
                created: created.clone(),
                destroyed: destroyed.clone(),
            }),
            created,
            destroyed,
        )
    }

    fn context_with(
        factories: Vec<Arc<dyn SandboxFactory>>,
        prewarm: bool,
    ) -> WorkflowSecurityContext {
        let metrics = Arc::new(MetricsCollector::new("conductor_security"));
        let audit = Arc::new(AuditPipeline::with_destinations(
            256,
            true,
            vec![],
            metrics.clone(),
        ));
        WorkflowSecurityContext::new(
            "wf-ctx",
            SecurityProfile::strict(),
            factories,
            prewarm,
            audit,
            metrics,
        )
    }

    #[tokio::test]
    async fn test_lazy_sandbox_from_container_factory() {
        let (container, created, _) = factory(SandboxKind::Container, true, false);
        let ctx = context_with(vec![container], false);

        assert_eq!(created.load(Ordering::SeqCst), 0);
        let sandbox = ctx.sandbox().await.unwrap().unwrap();
        assert_eq!(sandbox.kind(), SandboxKind::Container);
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(!ctx.is_degraded());

        // Second demand reuses the instance.
        let again = ctx.sandbox().await.unwrap().unwrap();
        assert_eq!(again.id(), sandbox.id());
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_to_process_marks_degraded() {
        let (container, ..) = factory(SandboxKind::Container, false, false);
        let (process, created, _) = factory(SandboxKind::Process, true, false);
        let ctx = context_with(vec![container, process], false);

        let sandbox = ctx.sandbox().await.unwrap().unwrap();
        assert_eq!(sandbox.kind(), SandboxKind::Process);
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(ctx.is_degraded());
    }

    #[tokio::test]
    async fn test_create_failure_falls_through() {
        let (container, ..) = factory(SandboxKind::Container, true, true);
        let (process, created, _) = factory(SandboxKind::Process, true, false);
        let ctx = context_with(vec![container, process], false);

        let sandbox = ctx.sandbox().await.unwrap().unwrap();
        assert_eq!(sandbox.kind(), SandboxKind::Process);
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(ctx.is_degraded());
    }

    #[tokio::test]
    async fn test_no_backend_available_degrades_without_sandbox() {
        let (container, ..) = factory(SandboxKind::Container, false, false);
        let ctx = context_with(vec![container], false);

        assert!(ctx.sandbox().await.unwrap().is_none());
        assert!(ctx.is_degraded());
        // The degraded state is sticky; no second factory probe.
        assert!(ctx.sandbox().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_profile_without_isolation_needs_no_sandbox() {
        let metrics = Arc::new(MetricsCollector::new("conductor_security"));
        let audit = Arc::new(AuditPipeline::with_destinations(8, true, vec![], metrics.clone()));
        let (container, created, _) = factory(SandboxKind::Container, true, false);
        let ctx = WorkflowSecurityContext::new(
            "wf-open",
            SecurityProfile::standard(),
            vec![container],
            false,
            audit,
            metrics,
        );
        assert!(ctx.sandbox().await.unwrap().is_none());
        assert_eq!(created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_prewarm_starts_sandbox_during_init() {
        let (container, created, _) = factory(SandboxKind::Container, true, false);
        let ctx = context_with(vec![container], true);
        ctx.init().await.unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cleanup_idempotent() {
        let (container, _, destroyed) = factory(SandboxKind::Container, true, false);
        let ctx = context_with(vec![container], false);
        ctx.sandbox().await.unwrap();

        ctx.cleanup().await.unwrap();
        ctx.cleanup().await.unwrap();
        ctx.cleanup().await.unwrap();
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);

        // A terminated context refuses to hand out sandboxes.
        assert!(ctx.sandbox().await.is_err());
    }
}
