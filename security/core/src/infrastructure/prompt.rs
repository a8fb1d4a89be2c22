// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Interactive permission prompt. Deny is the default answer; a
// non-interactive stdin refuses rather than silently granting, so headless
// runs must rely on persisted grants or declared access.

use std::io::{BufRead, IsTerminal, Write};

use crate::domain::access::AccessConfig;
use crate::domain::error::SecurityError;
use crate::infrastructure::permissions_store::PermissionsStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAnswer {
    /// Allow this run only.
    AllowOnce,
    /// Deny this run only.
    Deny,
    /// Allow and persist the grant for this workflow version.
    AlwaysAllow,
    /// Deny and persist the denial for this workflow version.
    NeverAllow,
}

/// Ask the operator to approve a workflow's requested permissions.
///
/// Accepted answers: `y` (once), `n` or empty (deny, the default), `always`
/// (persist the grant), `never` (persist the denial).
pub fn ask_permission(
    workflow_name: &str,
    permissions: &AccessConfig,
) -> Result<PromptAnswer, SecurityError> {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        return Err(SecurityError::AccessDenied {
            tool: String::new(),
            resource_type: "workflow".into(),
            resource: workflow_name.into(),
            action: "execute".into(),
            reason: "permission prompt requires an interactive terminal; \
                     grant access ahead of time or run with declared access"
                .into(),
            profile: String::new(),
        });
    }

    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "workflow {workflow_name:?} requests:");
    for line in describe_permissions(permissions) {
        let _ = writeln!(stderr, "  {line}");
    }
    let _ = write!(stderr, "allow? [y/N/always/never] ");
    let _ = stderr.flush();

    let mut answer = String::new();
    stdin
        .lock()
        .read_line(&mut answer)
        .map_err(|e| SecurityError::Validation(format!("reading prompt answer: {e}")))?;
    Ok(parse_answer(&answer))
}

/// Resolve a workflow's effective grant: a persisted denial refuses, a
/// persisted grant is honored, otherwise the operator is prompted and
/// `always`/`never` answers are written back to the store.
pub fn authorize_workflow(
    store: &mut PermissionsStore,
    workflow_name: &str,
    workflow_content: &[u8],
    requested: &AccessConfig,
) -> Result<AccessConfig, SecurityError> {
    let hash = PermissionsStore::hash_workflow(workflow_content);

    if store.is_denied(&hash) {
        return Err(denial(workflow_name, "access was previously denied for this workflow version"));
    }
    if let Some(grant) = store.lookup(&hash) {
        return Ok(grant.permissions.clone());
    }

    match ask_permission(workflow_name, requested)? {
        PromptAnswer::AllowOnce => Ok(requested.clone()),
        PromptAnswer::AlwaysAllow => {
            store.grant(&hash, workflow_name, requested.clone())?;
            Ok(requested.clone())
        }
        PromptAnswer::NeverAllow => {
            store.deny(&hash, workflow_name)?;
            Err(denial(workflow_name, "operator denied access permanently"))
        }
        PromptAnswer::Deny => Err(denial(workflow_name, "operator denied access")),
    }
}

fn denial(workflow_name: &str, reason: &str) -> SecurityError {
    SecurityError::AccessDenied {
        tool: String::new(),
        resource_type: "workflow".into(),
        resource: workflow_name.into(),
        action: "execute".into(),
        reason: reason.into(),
        profile: String::new(),
    }
}

pub fn parse_answer(raw: &str) -> PromptAnswer {
    match raw.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => PromptAnswer::AllowOnce,
        "always" => PromptAnswer::AlwaysAllow,
        "never" => PromptAnswer::NeverAllow,
        _ => PromptAnswer::Deny,
    }
}

fn describe_permissions(permissions: &AccessConfig) -> Vec<String> {
    let mut lines = Vec::new();
    if !permissions.filesystem.read.is_empty() {
        lines.push(format!("read:  {}", permissions.filesystem.read.join(", ")));
    }
    if !permissions.filesystem.write.is_empty() {
        lines.push(format!("write: {}", permissions.filesystem.write.join(", ")));
    }
    if !permissions.network.allow.is_empty() {
        lines.push(format!("network: {}", permissions.network.allow.join(", ")));
    }
    if !permissions.shell.commands.is_empty() {
        lines.push(format!("shell: {}", permissions.shell.commands.join(", ")));
    }
    if lines.is_empty() {
        lines.push("no additional access".to_string());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_parsing() {
        assert_eq!(parse_answer("y\n"), PromptAnswer::AllowOnce);
        assert_eq!(parse_answer("YES"), PromptAnswer::AllowOnce);
        assert_eq!(parse_answer("always"), PromptAnswer::AlwaysAllow);
        assert_eq!(parse_answer("never\n"), PromptAnswer::NeverAllow);
        // Deny is the default: empty input and anything unrecognized.
        assert_eq!(parse_answer(""), PromptAnswer::Deny);
        assert_eq!(parse_answer("\n"), PromptAnswer::Deny);
        assert_eq!(parse_answer("n"), PromptAnswer::Deny);
        assert_eq!(parse_answer("maybe"), PromptAnswer::Deny);
    }

    #[test]
    fn test_permission_summary() {
        let mut config = AccessConfig::default();
        config.filesystem.read.push("$cwd/**".into());
        config.network.allow.push("api.example.com".into());
        let lines = describe_permissions(&config);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("$cwd/**"));

        let empty = describe_permissions(&AccessConfig::default());
        assert_eq!(empty, vec!["no additional access"]);
    }

    #[test]
    fn test_persisted_grant_skips_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let mut store =
            PermissionsStore::open(&dir.path().join("permissions.yaml")).unwrap();
        let content = b"steps: [fetch, summarize]";
        let hash = PermissionsStore::hash_workflow(content);

        let mut requested = AccessConfig::default();
        requested.network.allow.push("api.example.com".into());
        store.grant(&hash, "summarizer", requested.clone()).unwrap();

        // No prompt involved: the persisted grant answers directly.
        let granted = authorize_workflow(&mut store, "summarizer", content, &requested).unwrap();
        assert_eq!(granted, requested);
    }

    #[test]
    fn test_persisted_denial_refuses_without_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let mut store =
            PermissionsStore::open(&dir.path().join("permissions.yaml")).unwrap();
        let content = b"steps: [exfiltrate]";
        let hash = PermissionsStore::hash_workflow(content);
        store.deny(&hash, "shady").unwrap();

        let err =
            authorize_workflow(&mut store, "shady", content, &AccessConfig::default()).unwrap_err();
        assert!(err.to_string().contains("previously denied"));
    }

    #[test]
    fn test_non_tty_denies() {
        // Test harnesses never run with a TTY stdin, so the guard refuses.
        if !std::io::stdin().is_terminal() {
            let err = ask_permission("wf", &AccessConfig::default()).unwrap_err();
            assert!(err.to_string().contains("interactive terminal"));
        }
    }
}
