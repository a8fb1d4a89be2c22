// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Declared-access checker. Evaluates a workflow's explicit grant set:
//! deny list first, then the allow list, and an empty allow list means no
//! access at all. All pattern resolution happens once, at construction, so
//! the per-call work is pure matching and stays comfortably inside the
//! sub-millisecond budget even with a hundred declared patterns.

use std::path::PathBuf;

use crate::domain::access::AccessConfig;
use crate::domain::error::SecurityError;
use crate::domain::matcher::{matches_any_host, matches_command, matches_deny, PathPattern, PathResolver};

/// Outcome of a single declared-access check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub allowed: bool,
    pub reason: String,
    /// Deny pattern that terminated the check, if any.
    pub denied_by: Option<String>,
    /// On deny, the grants that would have had to match.
    pub allowed_list: Vec<String>,
}

impl CheckResult {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            denied_by: None,
            allowed_list: Vec::new(),
        }
    }

    fn deny(reason: impl Into<String>, allowed_list: Vec<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            denied_by: None,
            allowed_list,
        }
    }

    fn denied_by(mut self, pattern: impl Into<String>) -> Self {
        self.denied_by = Some(pattern.into());
        self
    }
}

pub struct AccessChecker {
    resolver: PathResolver,
    read_patterns: Vec<PathPattern>,
    write_patterns: Vec<PathPattern>,
    deny_patterns: Vec<PathPattern>,
    network_allow: Vec<String>,
    network_deny: Vec<String>,
    shell_commands: Vec<String>,
    shell_deny: Vec<String>,
}

impl AccessChecker {
    /// Compile a declaration against a recorded working directory. Invalid
    /// patterns fail construction, not the hot path.
    pub fn new(config: &AccessConfig, resolver: PathResolver) -> Result<Self, SecurityError> {
        let compile = |patterns: &[String]| -> Result<Vec<PathPattern>, SecurityError> {
            patterns
                .iter()
                .map(|p| PathPattern::compile(p, &resolver))
                .collect()
        };

        Ok(Self {
            read_patterns: compile(&config.filesystem.read)?,
            write_patterns: compile(&config.filesystem.write)?,
            deny_patterns: compile(&config.filesystem.deny)?,
            network_allow: config.network.allow.clone(),
            network_deny: config.network.deny.clone(),
            shell_commands: config.shell.commands.clone(),
            shell_deny: config.shell.deny_patterns.clone(),
            resolver,
        })
    }

    pub fn check_filesystem_read(&self, path: &str) -> CheckResult {
        self.check_filesystem(path, &self.read_patterns, "read")
    }

    pub fn check_filesystem_write(&self, path: &str) -> CheckResult {
        self.check_filesystem(path, &self.write_patterns, "write")
    }

    fn check_filesystem(&self, path: &str, allow: &[PathPattern], action: &str) -> CheckResult {
        let resolved: PathBuf = match self.resolver.resolve(path) {
            Ok(p) => p,
            Err(e) => {
                return CheckResult::deny(
                    format!("path {path:?} could not be resolved: {e}"),
                    originals(allow),
                )
            }
        };

        for pattern in &self.deny_patterns {
            if pattern.matches(&resolved) {
                return CheckResult::deny(
                    format!("path {} matches deny pattern", resolved.display()),
                    originals(allow),
                )
                .denied_by(pattern.original());
            }
        }

        if allow.is_empty() {
            return CheckResult::deny(
                format!("workflow declares no filesystem {action} access"),
                Vec::new(),
            );
        }

        match allow.iter().find(|p| p.matches(&resolved)) {
            Some(pattern) => CheckResult::allow(format!(
                "path {} allowed by {}",
                resolved.display(),
                pattern.original()
            )),
            None => CheckResult::deny(
                format!("path {} matches no declared {action} grant", resolved.display()),
                originals(allow),
            ),
        }
    }

    pub fn check_network(&self, host: &str, port: u16) -> CheckResult {
        if let Some(pattern) = matches_any_host(&self.network_deny, host, Some(port)) {
            return CheckResult::deny(
                format!("host {host}:{port} matches deny pattern"),
                self.network_allow.clone(),
            )
            .denied_by(pattern);
        }
        if self.network_allow.is_empty() {
            return CheckResult::deny("workflow declares no network access", Vec::new());
        }
        match matches_any_host(&self.network_allow, host, Some(port)) {
            Some(pattern) => {
                CheckResult::allow(format!("host {host}:{port} allowed by {pattern}"))
            }
            None => CheckResult::deny(
                format!("host {host}:{port} matches no declared network grant"),
                self.network_allow.clone(),
            ),
        }
    }

    pub fn check_shell(&self, command: &str) -> CheckResult {
        if let Some(pattern) = self.shell_deny.iter().find(|p| matches_deny(p, command)) {
            return CheckResult::deny(
                format!("command matches deny pattern {pattern:?}"),
                self.shell_commands.clone(),
            )
            .denied_by(pattern.clone());
        }
        if self.shell_commands.is_empty() {
            return CheckResult::deny("workflow declares no shell access", Vec::new());
        }
        match self
            .shell_commands
            .iter()
            .find(|p| matches_command(p, command))
        {
            Some(pattern) => CheckResult::allow(format!("command allowed by {pattern:?}")),
            None => CheckResult::deny(
                "command matches no declared shell grant".to_string(),
                self.shell_commands.clone(),
            ),
        }
    }
}

fn originals(patterns: &[PathPattern]) -> Vec<String> {
    patterns.iter().map(|p| p.original().to_string()).collect()
}
