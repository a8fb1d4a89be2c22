// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tool-call interception. Translates a tool invocation into zero or more
//! access requests, runs each through the policy manager, and emits an
//! audit event per decision. The extraction switch on tool name is closed
//! on purpose: new tool kinds are added here, not through open polymorphism.
//!
//! A call without a security scope is allowed — that is the dev/test
//! mechanism; whether production runs with an always-present scope is the
//! host runtime's policy.

use serde_json::Value;
use std::sync::Arc;

use crate::domain::access::{AccessAction, AccessDecision, AccessRequest, ResourceType};
use crate::domain::error::SecurityError;
use crate::domain::event::{EventType, SecurityEvent};
use crate::infrastructure::audit::AuditPipeline;

use super::policy_manager::PolicyManager;

/// Identity of the workflow on whose behalf a tool runs.
#[derive(Debug, Clone, Default)]
pub struct SecurityScope {
    pub workflow_id: String,
    pub step_id: String,
    pub user_id: String,
}

pub struct ToolInterceptor {
    manager: Arc<PolicyManager>,
    audit: Arc<AuditPipeline>,
}

impl ToolInterceptor {
    pub fn new(manager: Arc<PolicyManager>, audit: Arc<AuditPipeline>) -> Self {
        Self { manager, audit }
    }

    /// Gate one tool invocation. Returns the decisions that were made; the
    /// first deny aborts with a typed error.
    pub fn intercept(
        &self,
        scope: Option<&SecurityScope>,
        tool_name: &str,
        inputs: &Value,
    ) -> Result<Vec<AccessDecision>, SecurityError> {
        let Some(scope) = scope else {
            // No scope on the call: dev/test mode, nothing to enforce.
            return Ok(Vec::new());
        };

        let requests = extract_requests(scope, tool_name, inputs);
        let mut decisions = Vec::with_capacity(requests.len());

        for request in requests {
            let decision = self.manager.check_access(&request);
            self.emit_event(scope, &request, &decision);

            if !decision.allowed {
                return Err(SecurityError::AccessDenied {
                    tool: request.tool_name,
                    resource_type: request.resource_type.as_str().to_string(),
                    resource: request.resource,
                    action: request.action.as_str().to_string(),
                    reason: decision.reason,
                    profile: decision.profile_name,
                });
            }
            decisions.push(decision);
        }
        Ok(decisions)
    }

    /// Reserved post-execution hook; no current behavior.
    pub fn post_execute(&self, _scope: Option<&SecurityScope>, _tool_name: &str, _output: &Value) {}

    fn emit_event(&self, scope: &SecurityScope, request: &AccessRequest, decision: &AccessDecision) {
        let (event_type, verdict) = if decision.allowed {
            (EventType::AccessGranted, "allowed")
        } else {
            (EventType::AccessDenied, "denied")
        };
        self.audit.log(
            SecurityEvent::new(event_type, verdict)
                .workflow(request.workflow_id.clone(), request.step_id.clone())
                .tool(request.tool_name.clone())
                .resource(request.resource_type.as_str(), request.resource.clone())
                .action(request.action.as_str())
                .reason(decision.reason.clone())
                .profile(decision.profile_name.clone())
                .user(scope.user_id.clone()),
        );
    }
}

/// Map a tool invocation to the access requests it implies.
fn extract_requests(scope: &SecurityScope, tool_name: &str, inputs: &Value) -> Vec<AccessRequest> {
    let request = |resource_type, resource: String, action| AccessRequest {
        workflow_id: scope.workflow_id.clone(),
        step_id: scope.step_id.clone(),
        tool_name: tool_name.to_string(),
        resource_type,
        resource,
        action,
    };

    match tool_name {
        "file" => {
            let Some(path) = string_input(inputs, "path") else {
                return Vec::new();
            };
            let action = match string_input(inputs, "operation").as_deref() {
                Some("write") => AccessAction::Write,
                _ => AccessAction::Read,
            };
            vec![request(ResourceType::File, path, action)]
        }
        "shell" => match string_input(inputs, "command") {
            Some(command) => vec![request(ResourceType::Command, command, AccessAction::Execute)],
            None => Vec::new(),
        },
        "http" => match string_input(inputs, "url").as_deref().map(host_of_url) {
            Some(Some(host)) => vec![request(ResourceType::Network, host, AccessAction::Connect)],
            _ => Vec::new(),
        },
        // Unknown tools that carry a path are treated as file access.
        _ => match string_input(inputs, "path") {
            Some(path) => vec![request(ResourceType::File, path, AccessAction::Read)],
            None => Vec::new(),
        },
    }
}

fn string_input(inputs: &Value, key: &str) -> Option<String> {
    inputs.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

/// Extract `host[:port]` from a URL by string splitting; no parsing library
/// and no resolution, matching the latency budget of the check path.
fn host_of_url(url: &str) -> Option<String> {
    let after_scheme = match url.split_once("://") {
        Some((_, rest)) => rest,
        None => url,
    };
    let authority = after_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    // Strip userinfo if present.
    let host_port = match authority.rsplit_once('@') {
        Some((_, host)) => host,
        None => authority,
    };
    if host_port.is_empty() {
        None
    } else {
        Some(host_port.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use crate::infrastructure::metrics::MetricsCollector;
    use serde_json::json;

    fn interceptor_with_profile(profile: &str) -> ToolInterceptor {
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
        let manager = Arc::new(PolicyManager::build(&config, audit.clone(), metrics).unwrap());
        ToolInterceptor::new(manager, audit)
    }

    fn scope() -> SecurityScope {
        SecurityScope {
            workflow_id: "wf-42".into(),
            step_id: "step-3".into(),
            user_id: "alice".into(),
        }
    }

    #[tokio::test]
    async fn test_no_scope_allows() {
        let interceptor = interceptor_with_profile("air-gapped");
        let decisions = interceptor
            .intercept(None, "shell", &json!({"command": "curl evil.example"}))
            .unwrap();
        assert!(decisions.is_empty());
    }

    #[tokio::test]
    async fn test_denied_shell_command_yields_typed_error() {
        let interceptor = interceptor_with_profile("standard");
        let err = interceptor
            .intercept(Some(&scope()), "shell", &json!({"command": "sudo rm -rf /"}))
            .unwrap_err();
        match err {
            SecurityError::AccessDenied {
                tool,
                resource_type,
                action,
                reason,
                profile,
                ..
            } => {
                assert_eq!(tool, "shell");
                assert_eq!(resource_type, "command");
                assert_eq!(action, "execute");
                assert!(reason.contains("explicitly denied"));
                assert_eq!(profile, "standard");
            }
            other => panic!("expected AccessDenied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_file_tool_write_operation() {
        let interceptor = interceptor_with_profile("standard");
        let decisions = interceptor
            .intercept(
                Some(&scope()),
                "file",
                &json!({"path": "output.txt", "operation": "write"}),
            )
            .unwrap();
        assert_eq!(decisions.len(), 1);
        assert!(decisions[0].allowed);
    }

    #[tokio::test]
    async fn test_http_tool_extracts_host() {
        let interceptor = interceptor_with_profile("air-gapped");
        let err = interceptor
            .intercept(
                Some(&scope()),
                "http",
                &json!({"url": "https://api.example.com/v1/data?q=1"}),
            )
            .unwrap_err();
        match err {
            SecurityError::AccessDenied { resource, .. } => {
                assert_eq!(resource, "api.example.com");
            }
            other => panic!("expected AccessDenied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_with_path_inferred_as_file_read() {
        let interceptor = interceptor_with_profile("standard");
        let err = interceptor
            .intercept(
                Some(&scope()),
                "custom-analyzer",
                &json!({"path": "~/.ssh/id_rsa"}),
            )
            .unwrap_err();
        assert!(matches!(err, SecurityError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn test_unknown_tool_without_extractable_input() {
        let interceptor = interceptor_with_profile("air-gapped");
        let decisions = interceptor
            .intercept(Some(&scope()), "thinker", &json!({"thought": "hmm"}))
            .unwrap();
        assert!(decisions.is_empty());
    }

    #[test]
    fn test_host_extraction() {
        assert_eq!(
            host_of_url("https://api.example.com/v1").as_deref(),
            Some("api.example.com")
        );
        assert_eq!(
            host_of_url("http://user:pw@proxy.example.com:8080/x").as_deref(),
            Some("proxy.example.com:8080")
        );
        assert_eq!(
            host_of_url("example.com/path").as_deref(),
            Some("example.com")
        );
        assert_eq!(host_of_url("https:///nohost"), None);
    }
}
