// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Security configuration schema. YAML and JSON are symmetric: the same
// serde model deserializes both, selected by file extension.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::domain::error::SecurityError;
use crate::domain::profile::SecurityProfile;

/// Top-level configuration for the security core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Profile installed at startup. Built-in names or a key of `profiles`.
    #[serde(default = "default_profile_name")]
    pub default_profile: String,

    #[serde(default)]
    pub policy: PolicyConfig,

    /// Operator-defined profiles, validated at build time.
    #[serde(default)]
    pub profiles: HashMap<String, SecurityProfile>,

    #[serde(default)]
    pub audit: AuditConfig,

    /// Start the sandbox during workflow init instead of on first demand.
    #[serde(default)]
    pub prewarm_sandbox: bool,

    #[serde(default)]
    pub dns: DnsSecurityConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default, rename = "override")]
    pub override_config: OverrideConfig,
}

fn default_profile_name() -> String {
    "standard".to_string()
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            default_profile: default_profile_name(),
            policy: PolicyConfig::default(),
            profiles: HashMap::new(),
            audit: AuditConfig::default(),
            prewarm_sandbox: false,
            dns: DnsSecurityConfig::default(),
            metrics: MetricsConfig::default(),
            override_config: OverrideConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Floor below which `load_profile` refuses to switch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_profile: Option<String>,

    /// Refuse to start when no audit destination is configured.
    #[serde(default)]
    pub require_audit_log: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub destinations: Vec<AuditDestinationConfig>,

    /// Buffered channel capacity; events beyond it are dropped, not blocked on.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default)]
    pub rotation: RotationConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            destinations: Vec::new(),
            buffer_size: default_buffer_size(),
            rotation: RotationConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_buffer_size() -> usize {
    1000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditDestinationType {
    File,
    RotatingFile,
    Syslog,
    Webhook,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditFormat {
    #[default]
    Json,
    Text,
}

/// One audit fan-out destination. Fields are destination-specific; the
/// constructor rejects combinations that make no sense for the type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditDestinationConfig {
    #[serde(rename = "type")]
    pub destination_type: AuditDestinationType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default)]
    pub format: AuditFormat,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Rotation threshold in bytes (rotating-file only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
    /// Retention window for rotated files (rotating-file only).
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_age: Option<Duration>,
    /// Cap on retained rotated files (rotating-file only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backups: Option<u32>,
    #[serde(default)]
    pub rotate_daily: bool,
    #[serde(default)]
    pub compress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_rotation_size_mb")]
    pub max_size_mb: u64,
    #[serde(default = "default_rotation_age_days")]
    pub max_age_days: u32,
    #[serde(default = "default_rotation_backups")]
    pub max_backups: u32,
    #[serde(default)]
    pub compress: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_size_mb: default_rotation_size_mb(),
            max_age_days: default_rotation_age_days(),
            max_backups: default_rotation_backups(),
            compress: false,
        }
    }
}

impl AuditConfig {
    /// Destination configs with the global rotation block filled into any
    /// rotating-file destination that does not set its own values.
    pub fn effective_destinations(&self) -> Vec<AuditDestinationConfig> {
        self.destinations
            .iter()
            .cloned()
            .map(|mut dest| {
                if dest.destination_type == AuditDestinationType::RotatingFile
                    && self.rotation.enabled
                {
                    if dest.max_size.is_none() {
                        dest.max_size = Some(self.rotation.max_size_mb * 1024 * 1024);
                    }
                    if dest.max_age.is_none() {
                        dest.max_age =
                            Some(Duration::from_secs(self.rotation.max_age_days as u64 * 86_400));
                    }
                    if dest.max_backups.is_none() {
                        dest.max_backups = Some(self.rotation.max_backups);
                    }
                    dest.compress = dest.compress || self.rotation.compress;
                }
                dest
            })
            .collect()
    }
}

fn default_rotation_size_mb() -> u64 {
    100
}
fn default_rotation_age_days() -> u32 {
    30
}
fn default_rotation_backups() -> u32 {
    10
}

/// DNS exfiltration monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsSecurityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// All dot-separated labels count, so `api.example.com` has depth 3.
    /// Operators setting a cap of 3 accept that hostname and reject
    /// `x.api.example.com`.
    #[serde(default = "default_subdomain_depth")]
    pub max_subdomain_depth: usize,

    /// DNS caps labels at 63 octets; lower values tighten the tunnel check.
    #[serde(default = "default_label_length")]
    pub max_label_length: usize,

    #[serde(default = "default_queries_per_minute")]
    pub max_queries_per_minute: usize,

    /// Suffixes of dynamic-DNS and tunnel providers, matched
    /// case-insensitively.
    #[serde(default = "default_blocked_suffixes")]
    pub blocked_suffixes: Vec<String>,

    /// Hostnames (and their subdomains) exempt from every check.
    #[serde(default)]
    pub allowlist: Vec<String>,

    /// Lifetime of a resolution in the rebind-detection cache.
    #[serde(default = "default_dns_cache_ttl", with = "humantime_serde")]
    pub cache_ttl: Duration,
}

impl Default for DnsSecurityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_subdomain_depth: default_subdomain_depth(),
            max_label_length: default_label_length(),
            max_queries_per_minute: default_queries_per_minute(),
            blocked_suffixes: default_blocked_suffixes(),
            allowlist: Vec::new(),
            cache_ttl: default_dns_cache_ttl(),
        }
    }
}

fn default_subdomain_depth() -> usize {
    10
}
fn default_label_length() -> usize {
    63
}
fn default_queries_per_minute() -> usize {
    120
}
fn default_dns_cache_ttl() -> Duration {
    Duration::from_secs(30)
}

fn default_blocked_suffixes() -> Vec<String> {
    [
        ".dyndns.org",
        ".no-ip.com",
        ".duckdns.org",
        ".freedns.afraid.org",
        ".ddns.net",
        ".ngrok.io",
        ".localhost.run",
        ".tunnelto.dev",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_namespace")]
    pub namespace: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: default_metrics_namespace(),
        }
    }
}

fn default_metrics_namespace() -> String {
    "conductor_security".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_override_ttl", with = "humantime_serde")]
    pub default_ttl: Duration,
    #[serde(default = "default_override_max_ttl", with = "humantime_serde")]
    pub max_ttl: Duration,
    #[serde(default = "default_true")]
    pub require_reason: bool,
}

impl Default for OverrideConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: default_override_ttl(),
            max_ttl: default_override_max_ttl(),
            require_reason: true,
        }
    }
}

fn default_override_ttl() -> Duration {
    Duration::from_secs(3600)
}
fn default_override_max_ttl() -> Duration {
    Duration::from_secs(24 * 3600)
}

impl SecurityConfig {
    /// Load from a YAML or JSON file, selected by extension.
    pub fn load(path: &Path) -> Result<Self, SecurityError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SecurityError::Config(format!("cannot read {}: {e}", path.display())))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&raw)
                .map_err(|e| SecurityError::Config(format!("invalid JSON config: {e}"))),
            _ => serde_yaml::from_str(&raw)
                .map_err(|e| SecurityError::Config(format!("invalid YAML config: {e}"))),
        }
    }

    /// Structural validation beyond what serde enforces. Fatal at startup.
    pub fn validate(&self) -> Result<(), SecurityError> {
        if SecurityProfile::builtin(&self.default_profile).is_none()
            && !self.profiles.contains_key(&self.default_profile)
        {
            return Err(SecurityError::Config(format!(
                "default_profile {:?} is neither built-in nor defined under profiles",
                self.default_profile
            )));
        }
        if let Some(min) = &self.policy.minimum_profile {
            if SecurityProfile::builtin(min).is_none() && !self.profiles.contains_key(min) {
                return Err(SecurityError::Config(format!(
                    "policy.minimum_profile {min:?} is not a known profile"
                )));
            }
        }
        for (name, profile) in &self.profiles {
            if profile.name != *name {
                return Err(SecurityError::Config(format!(
                    "profile key {name:?} does not match profile.name {:?}",
                    profile.name
                )));
            }
            profile.validate()?;
        }
        if self.policy.require_audit_log && (!self.audit.enabled || self.audit.destinations.is_empty())
        {
            return Err(SecurityError::Config(
                "policy.require_audit_log is set but no audit destination is configured".into(),
            ));
        }
        if self.override_config.max_ttl < self.override_config.default_ttl {
            return Err(SecurityError::Config(
                "override.max_ttl must be >= override.default_ttl".into(),
            ));
        }
        for dest in &self.audit.destinations {
            dest.validate()?;
        }
        Ok(())
    }
}

impl AuditDestinationConfig {
    pub fn validate(&self) -> Result<(), SecurityError> {
        match self.destination_type {
            AuditDestinationType::File | AuditDestinationType::RotatingFile => {
                if self.path.as_deref().is_none_or(str::is_empty) {
                    return Err(SecurityError::Config(format!(
                        "{:?} audit destination requires a path",
                        self.destination_type
                    )));
                }
            }
            AuditDestinationType::Webhook => {
                let url = self.url.as_deref().unwrap_or("");
                let parsed = url::Url::parse(url).map_err(|e| {
                    SecurityError::Config(format!("webhook audit destination URL invalid: {e}"))
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(SecurityError::Config(format!(
                        "webhook audit destination URL must be http(s), got {:?}",
                        parsed.scheme()
                    )));
                }
            }
            AuditDestinationType::Syslog => {}
        }
        Ok(())
    }
}
