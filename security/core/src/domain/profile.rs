// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Security profiles - named, immutable bundles of policy defaults.
//
// Four built-ins ship with the runtime (unrestricted, standard, strict,
// air-gapped); operators may add custom profiles via configuration. The
// policy manager installs one *active* profile and hands deep copies to
// workflow contexts so a profile switch never changes a running workflow's
// view mid-flight.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::error::SecurityError;

/// Filesystem policy section of a profile: allow/deny pattern lists.
///
/// Pattern grammar: absolute or relative paths, `~`/`~/…`, `$cwd`, `$temp`,
/// `*`, `?`, and double-star globs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemPolicy {
    #[serde(default)]
    pub read: Vec<String>,
    #[serde(default)]
    pub write: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

/// Network policy section: host allowlist plus private-range switches.
///
/// Host grammar: `host`, `*.host`, `host:port`, CIDR (`10.0.0.0/8`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicy {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny_private: bool,
    #[serde(default)]
    pub deny_all: bool,
}

/// Execution policy section: allowed/denied shell commands and sandboxing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    #[serde(default)]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub denied: Vec<String>,
    #[serde(default)]
    pub sandbox: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    #[default]
    None,
    Sandbox,
}

/// Per-workflow resource ceilings carried by a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Wall-clock budget for a single tool call.
    #[serde(with = "humantime_serde")]
    pub timeout_per_tool: Duration,

    /// Wall-clock budget for the whole workflow.
    #[serde(with = "humantime_serde")]
    pub total_runtime: Duration,

    /// Maximum resident memory in bytes (0 = unlimited).
    #[serde(default)]
    pub max_memory: u64,

    /// Maximum concurrent processes inside the sandbox.
    #[serde(default)]
    pub max_processes: u32,

    /// Maximum size of any file written by a tool, in bytes.
    #[serde(default)]
    pub max_file_size: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout_per_tool: Duration::from_secs(120),
            total_runtime: Duration::from_secs(3600),
            max_memory: 2 * 1024 * 1024 * 1024,
            max_processes: 64,
            max_file_size: 100 * 1024 * 1024,
        }
    }
}

/// A named, immutable bundle of policy defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityProfile {
    pub name: String,
    #[serde(default)]
    pub filesystem: FilesystemPolicy,
    #[serde(default)]
    pub network: NetworkPolicy,
    #[serde(default)]
    pub execution: ExecutionPolicy,
    #[serde(default)]
    pub isolation: IsolationMode,
    #[serde(default)]
    pub limits: ResourceLimits,
}

pub const PROFILE_UNRESTRICTED: &str = "unrestricted";
pub const PROFILE_STANDARD: &str = "standard";
pub const PROFILE_STRICT: &str = "strict";
pub const PROFILE_AIR_GAPPED: &str = "air-gapped";

impl SecurityProfile {
    /// Look up one of the four built-in profiles by name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            PROFILE_UNRESTRICTED => Some(Self::unrestricted()),
            PROFILE_STANDARD => Some(Self::standard()),
            PROFILE_STRICT => Some(Self::strict()),
            PROFILE_AIR_GAPPED => Some(Self::air_gapped()),
            _ => None,
        }
    }

    /// Names of all built-in profiles, in ascending restrictiveness.
    pub fn builtin_names() -> [&'static str; 4] {
        [
            PROFILE_UNRESTRICTED,
            PROFILE_STANDARD,
            PROFILE_STRICT,
            PROFILE_AIR_GAPPED,
        ]
    }

    /// Restrictiveness rank used to enforce a configured minimum profile.
    /// Custom profiles rank alongside `standard`.
    pub fn rank(name: &str) -> u8 {
        match name {
            PROFILE_UNRESTRICTED => 0,
            PROFILE_STRICT => 2,
            PROFILE_AIR_GAPPED => 3,
            _ => 1,
        }
    }

    /// No restrictions at all. For development hosts only.
    pub fn unrestricted() -> Self {
        Self {
            name: PROFILE_UNRESTRICTED.to_string(),
            filesystem: FilesystemPolicy::default(),
            network: NetworkPolicy::default(),
            execution: ExecutionPolicy::default(),
            isolation: IsolationMode::None,
            limits: ResourceLimits {
                timeout_per_tool: Duration::from_secs(600),
                total_runtime: Duration::from_secs(24 * 3600),
                max_memory: 0,
                max_processes: 0,
                max_file_size: 0,
            },
        }
    }

    /// The default posture: workspace-scoped writes, dangerous commands and
    /// private network ranges denied, everything else open.
    pub fn standard() -> Self {
        Self {
            name: PROFILE_STANDARD.to_string(),
            filesystem: FilesystemPolicy {
                read: vec![],
                write: vec!["$cwd/**".to_string(), "$temp/**".to_string()],
                deny: vec![
                    "~/.ssh/**".to_string(),
                    "~/.aws/**".to_string(),
                    "~/.gnupg/**".to_string(),
                    "/etc/shadow".to_string(),
                    "/etc/sudoers".to_string(),
                ],
            },
            network: NetworkPolicy {
                allow: vec![],
                deny_private: true,
                deny_all: false,
            },
            execution: ExecutionPolicy {
                allowed: vec![],
                denied: vec![
                    "sudo".to_string(),
                    "su".to_string(),
                    "mkfs".to_string(),
                    "dd".to_string(),
                    "shutdown".to_string(),
                    "reboot".to_string(),
                    "rm -rf /".to_string(),
                ],
                sandbox: false,
            },
            isolation: IsolationMode::None,
            limits: ResourceLimits::default(),
        }
    }

    /// Sandboxed execution, workspace-only filesystem, explicit allowlists.
    pub fn strict() -> Self {
        Self {
            name: PROFILE_STRICT.to_string(),
            filesystem: FilesystemPolicy {
                read: vec!["$cwd/**".to_string(), "$temp/**".to_string()],
                write: vec!["$cwd/**".to_string(), "$temp/**".to_string()],
                deny: vec![
                    "~/.ssh/**".to_string(),
                    "~/.aws/**".to_string(),
                    "~/.gnupg/**".to_string(),
                ],
            },
            network: NetworkPolicy {
                allow: vec!["*.github.com".to_string(), "api.anthropic.com".to_string()],
                deny_private: true,
                deny_all: false,
            },
            execution: ExecutionPolicy {
                allowed: vec![
                    "git".to_string(),
                    "ls".to_string(),
                    "cat".to_string(),
                    "grep".to_string(),
                    "find".to_string(),
                ],
                denied: vec!["sudo".to_string(), "su".to_string()],
                sandbox: true,
            },
            isolation: IsolationMode::Sandbox,
            limits: ResourceLimits {
                timeout_per_tool: Duration::from_secs(60),
                total_runtime: Duration::from_secs(1800),
                max_memory: 1024 * 1024 * 1024,
                max_processes: 32,
                max_file_size: 50 * 1024 * 1024,
            },
        }
    }

    /// No network at all; empty allow lists deny rather than permit.
    pub fn air_gapped() -> Self {
        Self {
            name: PROFILE_AIR_GAPPED.to_string(),
            filesystem: FilesystemPolicy {
                read: vec!["$cwd/**".to_string(), "$temp/**".to_string()],
                write: vec!["$cwd/**".to_string(), "$temp/**".to_string()],
                deny: vec!["~/.ssh/**".to_string(), "~/.aws/**".to_string()],
            },
            network: NetworkPolicy {
                allow: vec![],
                deny_private: true,
                deny_all: true,
            },
            execution: ExecutionPolicy {
                allowed: vec!["ls".to_string(), "cat".to_string(), "grep".to_string()],
                denied: vec![],
                sandbox: true,
            },
            isolation: IsolationMode::Sandbox,
            limits: ResourceLimits {
                timeout_per_tool: Duration::from_secs(30),
                total_runtime: Duration::from_secs(900),
                max_memory: 512 * 1024 * 1024,
                max_processes: 16,
                max_file_size: 10 * 1024 * 1024,
            },
        }
    }

    /// Validate a (custom) profile before it is installed.
    pub fn validate(&self) -> Result<(), SecurityError> {
        if self.name.is_empty() {
            return Err(SecurityError::Config("profile name must not be empty".into()));
        }
        if self.limits.timeout_per_tool.is_zero() {
            return Err(SecurityError::Config(format!(
                "profile {}: timeout_per_tool must be positive",
                self.name
            )));
        }
        if self.limits.total_runtime < self.limits.timeout_per_tool {
            return Err(SecurityError::Config(format!(
                "profile {}: total_runtime must be >= timeout_per_tool",
                self.name
            )));
        }
        if self.network.deny_all && !self.network.allow.is_empty() {
            return Err(SecurityError::Config(format!(
                "profile {}: network.allow is meaningless with deny_all",
                self.name
            )));
        }
        Ok(())
    }
}
