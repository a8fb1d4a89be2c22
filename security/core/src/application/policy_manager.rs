// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Policy manager: holds the one active profile for the process, evaluates
//! access requests against it, and owns the override manager. Workflow
//! contexts take deep copies of the active profile at creation, so a
//! profile switch never changes a running workflow's view mid-flight; only
//! requests evaluated directly against the manager see the new profile.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::config::SecurityConfig;
use crate::domain::access::{AccessAction, AccessDecision, AccessRequest, ResourceType};
use crate::domain::error::SecurityError;
use crate::domain::matcher::{
    matches_any_host, matches_command, matches_deny, PathPattern, PathResolver,
};
use crate::domain::overrides::OverrideType;
use crate::domain::profile::{IsolationMode, SecurityProfile, PROFILE_AIR_GAPPED};
use crate::infrastructure::audit::AuditPipeline;
use crate::infrastructure::egress::ip_guard::is_private_or_local;
use crate::infrastructure::metrics::MetricsCollector;

use super::override_manager::OverrideManager;

/// The active profile with its filesystem patterns compiled once per
/// installation rather than per check.
struct CompiledProfile {
    profile: SecurityProfile,
    read: Vec<PathPattern>,
    write: Vec<PathPattern>,
    deny: Vec<PathPattern>,
}

impl CompiledProfile {
    fn compile(profile: SecurityProfile, resolver: &PathResolver) -> Result<Self, SecurityError> {
        let compile_list = |patterns: &[String]| -> Result<Vec<PathPattern>, SecurityError> {
            patterns
                .iter()
                .map(|p| PathPattern::compile(p, resolver))
                .collect()
        };
        Ok(Self {
            read: compile_list(&profile.filesystem.read)?,
            write: compile_list(&profile.filesystem.write)?,
            deny: compile_list(&profile.filesystem.deny)?,
            profile,
        })
    }
}

pub struct PolicyManager {
    active: RwLock<Arc<CompiledProfile>>,
    custom_profiles: HashMap<String, SecurityProfile>,
    minimum_profile: Option<String>,
    resolver: PathResolver,
    overrides: Arc<OverrideManager>,
    audit: Arc<AuditPipeline>,
    metrics: Arc<MetricsCollector>,
}

impl PolicyManager {
    /// Build from validated configuration. Custom profiles are checked and
    /// the default profile installed; any inconsistency is fatal here rather
    /// than at first check.
    pub fn build(
        config: &SecurityConfig,
        audit: Arc<AuditPipeline>,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self, SecurityError> {
        config.validate()?;
        let resolver = PathResolver::from_process_env()?;

        let initial = Self::lookup_in(&config.profiles, &config.default_profile)?;
        let compiled = CompiledProfile::compile(initial, &resolver)?;
        metrics.record_profile_switch(&compiled.profile.name);

        Ok(Self {
            active: RwLock::new(Arc::new(compiled)),
            custom_profiles: config.profiles.clone(),
            minimum_profile: config.policy.minimum_profile.clone(),
            resolver,
            overrides: Arc::new(OverrideManager::new(
                config.override_config.clone(),
                audit.clone(),
            )),
            audit,
            metrics,
        })
    }

    fn lookup_in(
        custom: &HashMap<String, SecurityProfile>,
        name: &str,
    ) -> Result<SecurityProfile, SecurityError> {
        if let Some(profile) = SecurityProfile::builtin(name) {
            return Ok(profile);
        }
        custom
            .get(name)
            .cloned()
            .ok_or_else(|| SecurityError::NotFound(format!("unknown security profile {name:?}")))
    }

    /// Deep copy of the active profile.
    pub fn active_profile(&self) -> SecurityProfile {
        self.active.read().profile.clone()
    }

    pub fn overrides(&self) -> &Arc<OverrideManager> {
        &self.overrides
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn audit(&self) -> &Arc<AuditPipeline> {
        &self.audit
    }

    /// Install a different profile: built-ins first, then custom, `NotFound`
    /// otherwise. Refuses to drop below the configured minimum.
    pub fn load_profile(&self, name: &str) -> Result<(), SecurityError> {
        let profile = Self::lookup_in(&self.custom_profiles, name)?;
        profile.validate()?;

        if let Some(min) = &self.minimum_profile {
            if SecurityProfile::rank(name) < SecurityProfile::rank(min) {
                return Err(SecurityError::Validation(format!(
                    "profile {name:?} is below the configured minimum {min:?}"
                )));
            }
        }

        let compiled = CompiledProfile::compile(profile, &self.resolver)?;
        let name = compiled.profile.name.clone();
        *self.active.write() = Arc::new(compiled);
        self.metrics.record_profile_switch(&name);
        info!(profile = %name, "security profile installed");
        Ok(())
    }

    /// Evaluate one access request against the active profile.
    pub fn check_access(&self, request: &AccessRequest) -> AccessDecision {
        let active = self.active.read().clone();

        if self.overrides.is_active(OverrideType::DisableEnforcement) {
            let decision = AccessDecision::allow(
                "enforcement disabled by active override",
                &active.profile.name,
            );
            self.metrics.record_access(request.resource_type, true);
            return decision;
        }

        let decision = match request.resource_type {
            ResourceType::File => self.check_file(&active, request),
            ResourceType::Network => self.check_network(&active, request),
            ResourceType::Command => self.check_command(&active, request),
        };
        self.metrics.record_access(request.resource_type, decision.allowed);
        decision
    }

    fn check_file(&self, active: &CompiledProfile, request: &AccessRequest) -> AccessDecision {
        let profile = &active.profile;
        let resolved = match self.resolver.resolve(&request.resource) {
            Ok(p) => p,
            Err(e) => {
                return AccessDecision::deny(
                    format!("path could not be resolved: {e}"),
                    &profile.name,
                )
            }
        };

        for pattern in &active.deny {
            if pattern.matches(&resolved) {
                return AccessDecision::deny(
                    format!("path {} is explicitly denied", resolved.display()),
                    &profile.name,
                )
                .denied_by(pattern.original())
                .with_allowed_list(allow_list_for(profile, request.action));
            }
        }

        let (allow, allow_sources) = match request.action {
            AccessAction::Read => (&active.read, &profile.filesystem.read),
            AccessAction::Write => (&active.write, &profile.filesystem.write),
            _ => {
                // Fail closed on an action that makes no sense for files.
                return AccessDecision::deny(
                    format!("action {} is not valid for files", request.action.as_str()),
                    &profile.name,
                );
            }
        };

        if allow.is_empty() {
            // Profile semantics: an empty allow list is unrestricted, except
            // under air-gapped where it denies.
            if profile.name == PROFILE_AIR_GAPPED {
                return AccessDecision::deny(
                    "air-gapped profile denies paths without an explicit grant",
                    &profile.name,
                );
            }
            return AccessDecision::allow(
                format!("profile places no {} restrictions", request.action.as_str()),
                &profile.name,
            );
        }

        match allow.iter().find(|p| p.matches(&resolved)) {
            Some(pattern) => AccessDecision::allow(
                format!("path allowed by {}", pattern.original()),
                &profile.name,
            ),
            None => AccessDecision::deny(
                format!(
                    "path {} is outside the profile's {} set",
                    resolved.display(),
                    request.action.as_str()
                ),
                &profile.name,
            )
            .with_allowed_list(allow_sources.clone()),
        }
    }

    /// Network checks never resolve hostnames; only literal addresses are
    /// classified against private ranges. Resolution-based SSRF decisions
    /// belong to the egress guard, which has the DNS cache.
    fn check_network(&self, active: &CompiledProfile, request: &AccessRequest) -> AccessDecision {
        let profile = &active.profile;
        let network = &profile.network;
        let (host, port) = split_resource_host(&request.resource);

        if network.deny_all {
            return AccessDecision::deny("profile denies all network access", &profile.name);
        }

        if network.deny_private {
            if let Ok(ip) = IpAddr::from_str(host) {
                if is_private_or_local(ip) {
                    return AccessDecision::deny(
                        "private and local address ranges are denied",
                        &profile.name,
                    );
                }
            }
        }

        if network.allow.is_empty() {
            return AccessDecision::allow("profile places no network restrictions", &profile.name);
        }

        match matches_any_host(&network.allow, host, port) {
            Some(pattern) => {
                AccessDecision::allow(format!("host allowed by {pattern}"), &profile.name)
            }
            None => AccessDecision::deny(
                format!("host {host} is not in the profile's allow list"),
                &profile.name,
            )
            .with_allowed_list(network.allow.clone()),
        }
    }

    fn check_command(&self, active: &CompiledProfile, request: &AccessRequest) -> AccessDecision {
        let profile = &active.profile;
        let execution = &profile.execution;
        let command = &request.resource;

        if let Some(pattern) = execution.denied.iter().find(|p| matches_deny(p, command)) {
            return AccessDecision::deny(
                format!("command is explicitly denied by {pattern:?}"),
                &profile.name,
            )
            .denied_by(pattern.clone())
            .with_allowed_list(execution.allowed.clone());
        }

        if execution.allowed.is_empty() {
            return AccessDecision::allow("profile places no command restrictions", &profile.name);
        }

        match execution
            .allowed
            .iter()
            .find(|p| matches_command(p, command))
        {
            Some(pattern) => {
                AccessDecision::allow(format!("command allowed by {pattern:?}"), &profile.name)
            }
            None => AccessDecision::deny(
                "command is not in the profile's allow list",
                &profile.name,
            )
            .with_allowed_list(execution.allowed.clone()),
        }
    }

    /// Whether newly created workflow contexts should carry a sandbox.
    pub fn sandbox_required(&self) -> bool {
        self.active.read().profile.isolation == IsolationMode::Sandbox
            && !self.overrides.is_active(OverrideType::DisableSandbox)
    }
}

fn allow_list_for(profile: &SecurityProfile, action: AccessAction) -> Vec<String> {
    match action {
        AccessAction::Read => profile.filesystem.read.clone(),
        AccessAction::Write => profile.filesystem.write.clone(),
        _ => Vec::new(),
    }
}

/// Split a network resource of the form `host` or `host:port`.
fn split_resource_host(resource: &str) -> (&str, Option<u16>) {
    if let Some((host, port)) = resource.rsplit_once(':') {
        if !host.contains(':') {
            if let Ok(port) = port.parse::<u16>() {
                return (host, Some(port));
            }
        }
    }
    (resource, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use crate::domain::profile::PROFILE_STANDARD;

    fn build_manager(config: SecurityConfig) -> PolicyManager {
        let metrics = Arc::new(MetricsCollector::new("conductor_security"));
        let audit = Arc::new(AuditPipeline::with_destinations(
            64,
            true,
            vec![],
            metrics.clone(),
        ));
        PolicyManager::build(&config, audit, metrics).unwrap()
    }

    fn manager_with_profile(name: &str) -> PolicyManager {
        let config = SecurityConfig {
            default_profile: name.to_string(),
            ..SecurityConfig::default()
        };
        build_manager(config)
    }

    fn request(resource_type: ResourceType, resource: &str, action: AccessAction) -> AccessRequest {
        AccessRequest {
            workflow_id: "wf-1".into(),
            step_id: "step-1".into(),
            tool_name: "test".into(),
            resource_type,
            resource: resource.into(),
            action,
        }
    }

    #[tokio::test]
    async fn test_standard_denies_sudo() {
        let manager = manager_with_profile(PROFILE_STANDARD);
        let decision = manager.check_access(&request(
            ResourceType::Command,
            "sudo rm -rf /",
            AccessAction::Execute,
        ));
        assert!(!decision.allowed);
        assert!(decision.reason.contains("explicitly denied"));
        assert_eq!(decision.profile_name, "standard");
    }

    #[tokio::test]
    async fn test_standard_allows_ordinary_commands() {
        let manager = manager_with_profile(PROFILE_STANDARD);
        let decision = manager.check_access(&request(
            ResourceType::Command,
            "git status",
            AccessAction::Execute,
        ));
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_air_gapped_denies_all_network() {
        let manager = manager_with_profile("air-gapped");
        let decision = manager.check_access(&request(
            ResourceType::Network,
            "api.example.com:443",
            AccessAction::Connect,
        ));
        assert!(!decision.allowed);
        assert!(decision.reason.contains("all network"));
    }

    #[tokio::test]
    async fn test_air_gapped_empty_allow_denies_paths() {
        let manager = manager_with_profile("air-gapped");
        // air-gapped grants $cwd/**; a path outside it is denied even though
        // other profiles would treat restrictions as absent.
        let decision = manager.check_access(&request(
            ResourceType::File,
            "/etc/hostname",
            AccessAction::Read,
        ));
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn test_deny_private_blocks_literal_ips_only() {
        let manager = manager_with_profile(PROFILE_STANDARD);
        let denied = manager.check_access(&request(
            ResourceType::Network,
            "192.168.0.10:80",
            AccessAction::Connect,
        ));
        assert!(!denied.allowed);

        // Hostnames are not resolved here; the egress guard handles them.
        let allowed = manager.check_access(&request(
            ResourceType::Network,
            "internal.corp.example:80",
            AccessAction::Connect,
        ));
        assert!(allowed.allowed);
    }

    #[tokio::test]
    async fn test_load_profile_switches_atomically() {
        let manager = manager_with_profile(PROFILE_STANDARD);
        assert_eq!(manager.active_profile().name, "standard");

        manager.load_profile("strict").unwrap();
        assert_eq!(manager.active_profile().name, "strict");

        let err = manager.load_profile("does-not-exist").unwrap_err();
        assert!(matches!(err, SecurityError::NotFound(_)));
        // Failed load leaves the active profile untouched.
        assert_eq!(manager.active_profile().name, "strict");
    }

    #[tokio::test]
    async fn test_minimum_profile_floor() {
        let config = SecurityConfig {
            default_profile: "strict".to_string(),
            policy: crate::config::PolicyConfig {
                minimum_profile: Some("standard".to_string()),
                require_audit_log: false,
            },
            ..SecurityConfig::default()
        };
        let manager = build_manager(config);
        let err = manager.load_profile("unrestricted").unwrap_err();
        assert!(matches!(err, SecurityError::Validation(_)));
        assert!(manager.load_profile("standard").is_ok());
    }

    #[tokio::test]
    async fn test_custom_profile_lookup_after_builtins() {
        let mut custom = SecurityProfile::standard();
        custom.name = "team-policy".to_string();
        custom.execution.denied.push("docker".to_string());

        let config = SecurityConfig {
            default_profile: "team-policy".to_string(),
            profiles: HashMap::from([("team-policy".to_string(), custom)]),
            ..SecurityConfig::default()
        };
        let manager = build_manager(config);
        let decision = manager.check_access(&request(
            ResourceType::Command,
            "docker run --privileged x",
            AccessAction::Execute,
        ));
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn test_override_short_circuits_to_allow() {
        let manager = manager_with_profile(PROFILE_STANDARD);
        let denied = manager.check_access(&request(
            ResourceType::Command,
            "sudo reboot",
            AccessAction::Execute,
        ));
        assert!(!denied.allowed);

        manager
            .overrides()
            .apply(
                OverrideType::DisableEnforcement,
                "incident",
                "oncall",
                Some(std::time::Duration::from_secs(60)),
            )
            .unwrap();

        let allowed = manager.check_access(&request(
            ResourceType::Command,
            "sudo reboot",
            AccessAction::Execute,
        ));
        assert!(allowed.allowed);
        assert!(allowed.reason.contains("override"));
    }

    #[tokio::test]
    async fn test_workflow_copy_unaffected_by_switch() {
        let manager = manager_with_profile(PROFILE_STANDARD);
        let copy = manager.active_profile();
        manager.load_profile("air-gapped").unwrap();
        assert_eq!(copy.name, "standard");
        assert_eq!(manager.active_profile().name, "air-gapped");
    }

    #[tokio::test]
    async fn test_profile_home_deny_patterns_apply() {
        let manager = manager_with_profile(PROFILE_STANDARD);
        if dirs::home_dir().is_none() {
            return;
        }
        let decision = manager.check_access(&request(
            ResourceType::File,
            "~/.ssh/id_ed25519",
            AccessAction::Read,
        ));
        assert!(!decision.allowed);
        assert_eq!(decision.denied_by.as_deref(), Some("~/.ssh/**"));
    }
}
