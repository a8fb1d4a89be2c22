// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Declared access model - the workflow-local, explicit grant set, distinct
// from the profile ceiling. An empty allow list here means *no access*
// (contrast with profiles, where empty means unrestricted).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    File,
    Network,
    Command,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::File => "file",
            ResourceType::Network => "network",
            ResourceType::Command => "command",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessAction {
    Read,
    Write,
    Execute,
    Connect,
}

impl AccessAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessAction::Read => "read",
            AccessAction::Write => "write",
            AccessAction::Execute => "execute",
            AccessAction::Connect => "connect",
        }
    }
}

/// Filesystem grants declared by a workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemAccess {
    #[serde(default)]
    pub read: Vec<String>,
    #[serde(default)]
    pub write: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

/// Network grants declared by a workflow (`host`, `*.host`, `host:port`, CIDR).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAccess {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

/// Shell grants declared by a workflow: allowed commands (base command or
/// multi-token prefix) and deny patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellAccess {
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub deny_patterns: Vec<String>,
}

/// A workflow-scoped access declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessConfig {
    #[serde(default)]
    pub filesystem: FilesystemAccess,
    #[serde(default)]
    pub network: NetworkAccess,
    #[serde(default)]
    pub shell: ShellAccess,
}

/// One mediated access attempt, extracted from a tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub workflow_id: String,
    #[serde(default)]
    pub step_id: String,
    pub tool_name: String,
    pub resource_type: ResourceType,
    pub resource: String,
    pub action: AccessAction,
}

/// Outcome of evaluating an [`AccessRequest`].
///
/// Always carries a human-readable reason; on deny, `allowed_list` holds the
/// grants that *would* have matched, for the error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: String,
    pub profile_name: String,
    pub denied_by: Option<String>,
    pub allowed_list: Vec<String>,
}

impl AccessDecision {
    pub fn allow(reason: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            profile_name: profile.into(),
            denied_by: None,
            allowed_list: Vec::new(),
        }
    }

    pub fn deny(reason: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            profile_name: profile.into(),
            denied_by: None,
            allowed_list: Vec::new(),
        }
    }

    pub fn denied_by(mut self, pattern: impl Into<String>) -> Self {
        self.denied_by = Some(pattern.into());
        self
    }

    pub fn with_allowed_list(mut self, list: Vec<String>) -> Self {
        self.allowed_list = list;
        self
    }
}
