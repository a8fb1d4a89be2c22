// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// End-to-end checks across the policy manager, interceptor, audit pipeline,
// DNS monitor, and egress guard, covering the adversarial scenarios the
// core exists to stop.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use conductor_security_core::application::interceptor::{SecurityScope, ToolInterceptor};
use conductor_security_core::application::policy_manager::PolicyManager;
use conductor_security_core::config::{DnsSecurityConfig, SecurityConfig};
use conductor_security_core::domain::access::{AccessAction, AccessConfig, AccessRequest, ResourceType};
use conductor_security_core::domain::error::SecurityError;
use conductor_security_core::domain::matcher::PathResolver;
use conductor_security_core::domain::overrides::OverrideType;
use conductor_security_core::infrastructure::audit::AuditPipeline;
use conductor_security_core::infrastructure::dns_monitor::DnsQueryMonitor;
use conductor_security_core::infrastructure::egress::ip_guard::IpPolicy;
use conductor_security_core::infrastructure::egress::{HttpEgressConfig, HttpEgressGuard};
use conductor_security_core::infrastructure::metrics::MetricsCollector;
use conductor_security_core::AccessChecker;

fn build_manager(profile: &str) -> (Arc<PolicyManager>, Arc<AuditPipeline>, Arc<MetricsCollector>) {
    let metrics = Arc::new(MetricsCollector::new("conductor_security"));
    let audit = Arc::new(AuditPipeline::with_destinations(
        256,
        true,
        vec![],
        metrics.clone(),
    ));
    let config = SecurityConfig {
        default_profile: profile.to_string(),
        ..SecurityConfig::default()
    };
    let manager = Arc::new(PolicyManager::build(&config, audit.clone(), metrics.clone()).unwrap());
    (manager, audit, metrics)
}

#[tokio::test]
async fn test_standard_profile_denies_destructive_shell() {
    let (manager, audit, metrics) = build_manager("standard");
    let interceptor = ToolInterceptor::new(manager, audit.clone());
    let scope = SecurityScope {
        workflow_id: "wf-shell".into(),
        step_id: "step-1".into(),
        user_id: "ci".into(),
    };

    let err = interceptor
        .intercept(Some(&scope), "shell", &json!({"command": "sudo rm -rf /"}))
        .unwrap_err();
    match err {
        SecurityError::AccessDenied { reason, profile, .. } => {
            assert!(reason.contains("explicitly denied"));
            assert_eq!(profile, "standard");
        }
        other => panic!("expected AccessDenied, got {other:?}"),
    }

    audit.close().await.unwrap();
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.access_denied, 1);
    assert_eq!(snapshot.audit_events_logged, 1);
}

#[tokio::test]
async fn test_metadata_endpoint_blocked_without_connection() {
    let monitor = Arc::new(DnsQueryMonitor::new(DnsSecurityConfig::default()));
    let guard = HttpEgressGuard::new(
        HttpEgressConfig::default(),
        monitor,
        Duration::from_secs(30),
    );

    let err = guard
        .get("http://169.254.169.254/latest/meta-data")
        .await
        .unwrap_err();
    assert!(matches!(err, SecurityError::SecurityBlocked(_)));
    assert!(err.to_string().contains("metadata"));
}

#[tokio::test]
async fn test_subdomain_depth_scenario() {
    let monitor = DnsQueryMonitor::new(DnsSecurityConfig {
        max_subdomain_depth: 3,
        ..DnsSecurityConfig::default()
    });
    // Six labels against a cap of three.
    let err = monitor.validate_query("a.b.c.d.example.com").unwrap_err();
    assert!(err.to_string().contains("subdomain depth"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_escape_from_declared_grant() {
    let dir = tempfile::tempdir().unwrap();
    let allowed = dir.path().join("allowed");
    let restricted = dir.path().join("restricted");
    std::fs::create_dir(&allowed).unwrap();
    std::fs::create_dir(&restricted).unwrap();
    std::fs::write(restricted.join("secret.txt"), b"top secret").unwrap();
    std::os::unix::fs::symlink(restricted.join("secret.txt"), allowed.join("link")).unwrap();

    let config: AccessConfig = serde_yaml::from_str(&format!(
        "filesystem:\n  read: [\"{}/allowed/**\"]\n",
        dir.path().display()
    ))
    .unwrap();
    let checker =
        AccessChecker::new(&config, PathResolver::new(dir.path().to_path_buf())).unwrap();

    let direct = checker.check_filesystem_read(&format!("{}/allowed/notes.txt", dir.path().display()));
    assert!(direct.allowed);

    let through_link = checker.check_filesystem_read(&format!("{}/allowed/link", dir.path().display()));
    assert!(!through_link.allowed, "symlink escape must be denied");
}

#[tokio::test]
async fn test_unanswered_connection_times_out() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming() {
            if let Ok(s) = stream {
                held.push(s);
            }
        }
    });

    let monitor = Arc::new(DnsQueryMonitor::new(DnsSecurityConfig::default()));
    let guard = HttpEgressGuard::new(
        HttpEgressConfig {
            ip_policy: IpPolicy {
                block_private: false,
                block_metadata: true,
            },
            ..HttpEgressConfig::default()
        },
        monitor,
        Duration::from_secs(30),
    );

    let err = guard
        .request(conductor_security_core::HttpRequestSpec {
            method: "GET".into(),
            url: format!("http://{addr}/"),
            timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SecurityError::Timeout(_)), "got {err:?}");
    assert!(err.retryable());
}

#[tokio::test]
async fn test_override_lifecycle_with_expiry_events() {
    let (manager, audit, _metrics) = build_manager("standard");

    manager
        .overrides()
        .apply(
            OverrideType::DisableEnforcement,
            "expiry test",
            "oncall",
            Some(Duration::from_secs(1)),
        )
        .unwrap();
    assert!(manager.overrides().is_active(OverrideType::DisableEnforcement));

    // While active, a normally denied request passes.
    let request = AccessRequest {
        workflow_id: "wf-ovr".into(),
        step_id: "s".into(),
        tool_name: "shell".into(),
        resource_type: ResourceType::Command,
        resource: "sudo ls".into(),
        action: AccessAction::Execute,
    };
    assert!(manager.check_access(&request).allowed);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(!manager.overrides().is_active(OverrideType::DisableEnforcement));
    assert!(!manager.check_access(&request).allowed);

    // Cleanup reclaims the grant and emits its expiry event.
    assert_eq!(manager.overrides().cleanup(), 1);
    audit.close().await.unwrap();
}

#[tokio::test]
async fn test_profile_switch_does_not_leak_into_running_workflow() {
    let (manager, _audit, _metrics) = build_manager("unrestricted");
    let copy = manager.active_profile();
    manager.load_profile("air-gapped").unwrap();

    // The workflow's captured copy still reads as unrestricted while new
    // checks against the manager see air-gapped.
    assert_eq!(copy.name, "unrestricted");
    let request = AccessRequest {
        workflow_id: "wf".into(),
        step_id: "s".into(),
        tool_name: "http".into(),
        resource_type: ResourceType::Network,
        resource: "example.com:443".into(),
        action: AccessAction::Connect,
    };
    assert!(!manager.check_access(&request).allowed);
}
