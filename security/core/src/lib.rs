// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # conductor-security-core
//!
//! Process-wide security enforcement for the Conductor workflow runtime.
//! Every filesystem, network, and shell access an agent workflow attempts is
//! mediated here before the tool runs.
//!
//! ## Components
//!
//! | Component | Module | Responsibility |
//! |---|---|---|
//! | Matchers | [`domain::matcher`] | Canonicalized path/host/command predicates |
//! | Audit pipeline | [`infrastructure::audit`] | Buffered fan-out to file/rotating/syslog/webhook |
//! | Access checker | [`application::access_checker`] | Workflow-declared grant evaluation |
//! | Policy manager | [`application::policy_manager`] | Active profile, request dispatch, overrides |
//! | HTTP egress | [`infrastructure::egress`] | SSRF-resistant outbound requests |
//! | DNS monitor | [`infrastructure::dns_monitor`] | Tunnel and exfiltration heuristics |
//! | Interceptor | [`application::interceptor`] | Tool call -> access request translation |
//! | Workflow context | [`application::workflow_context`] | Per-workflow state + sandbox lifecycle |
//! | Overrides + metrics | [`application::override_manager`], [`infrastructure::metrics`] | Time-bounded bypass, counters/gauges |
//!
//! ## Layer structure
//!
//! ```text
//! application/    <- use-cases: checker, manager, interceptor, contexts, service
//!     |
//! domain/         <- pure types and predicates: profiles, requests, events, matchers
//!     |
//! infrastructure/ <- I/O: audit destinations, HTTP egress, DNS, sandboxes, files
//! ```
//!
//! ## Decision model
//!
//! Two grant models overlap. A *profile* is the process-wide ceiling: deny
//! lists always win, an empty allow list means unrestricted (except under
//! `air-gapped`). A *declared access* set is workflow-local and explicit: an
//! empty allow list means no access. The process has a single manager
//! holding the active profile; workflow contexts copy it at creation, so a
//! profile switch mid-run never changes a running workflow's rules.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use application::access_checker::{AccessChecker, CheckResult};
pub use application::interceptor::{SecurityScope, ToolInterceptor};
pub use application::override_manager::OverrideManager;
pub use application::policy_manager::PolicyManager;
pub use application::service::SecurityService;
pub use application::workflow_context::WorkflowSecurityContext;
pub use config::SecurityConfig;
pub use domain::access::{AccessAction, AccessConfig, AccessDecision, AccessRequest, ResourceType};
pub use domain::error::{ErrorKind, SecurityError};
pub use domain::event::{EventType, SecurityEvent};
pub use domain::overrides::{OverrideType, PolicyOverride};
pub use domain::profile::SecurityProfile;
pub use infrastructure::audit::AuditPipeline;
pub use infrastructure::dns_monitor::DnsQueryMonitor;
pub use infrastructure::egress::{HttpEgressConfig, HttpEgressGuard, HttpRequestSpec, HttpResult};
pub use infrastructure::metrics::{MetricsCollector, MetricsSnapshot};
