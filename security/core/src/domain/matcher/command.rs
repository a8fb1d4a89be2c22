// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shell command matching.
//!
//! The base command is the source of truth for single-token patterns:
//! `/usr/bin/git status` reduces to `git`. Multi-token patterns match as a
//! prefix with a word boundary, so `git push` covers `git push origin` but
//! not `git pushx`. Deny patterns match at any word boundary inside the
//! command line, which catches `cd /tmp && sudo rm -rf /`.

/// Extract the base command: leading whitespace stripped, first
/// whitespace-delimited field, directory prefix removed.
pub fn base_command(command: &str) -> &str {
    let first = command.trim_start().split_whitespace().next().unwrap_or("");
    match first.rsplit_once('/') {
        Some((_, name)) => name,
        None => first,
    }
}

/// Does `command` match an allow `pattern`?
///
/// Single-token pattern: equality with the base command. Multi-token
/// pattern: the command begins with the pattern followed by whitespace or
/// end-of-string.
pub fn matches_command(pattern: &str, command: &str) -> bool {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return false;
    }
    if !pattern.contains(char::is_whitespace) {
        return base_command(command) == pattern;
    }
    prefix_with_boundary(pattern, command.trim_start())
}

/// Does a deny `pattern` hit `command`?
///
/// The pattern may appear anywhere in the command as long as it starts at a
/// word boundary and ends at one, so `git push --force` denies
/// `git push --force origin main` and `sudo` denies `true && sudo reboot`.
pub fn matches_deny(pattern: &str, command: &str) -> bool {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return false;
    }
    let command = command.trim_start();

    let bytes = command.as_bytes();
    let mut search_from = 0;
    while let Some(offset) = command[search_from..].find(pattern) {
        let start = search_from + offset;
        let end = start + pattern.len();
        let boundary_before = start == 0 || bytes[start - 1].is_ascii_whitespace();
        let boundary_after = end == command.len() || bytes[end].is_ascii_whitespace();
        if boundary_before && boundary_after {
            return true;
        }
        search_from = start + 1;
    }
    false
}

fn prefix_with_boundary(pattern: &str, command: &str) -> bool {
    if !command.starts_with(pattern) {
        return false;
    }
    match command.as_bytes().get(pattern.len()) {
        None => true,
        Some(b) => b.is_ascii_whitespace(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_command_extraction() {
        assert_eq!(base_command("git status"), "git");
        assert_eq!(base_command("  /usr/bin/git status"), "git");
        assert_eq!(base_command("/bin/ls"), "ls");
        assert_eq!(base_command(""), "");
    }

    #[test]
    fn test_single_token_pattern() {
        assert!(matches_command("git", "git status"));
        assert!(matches_command("git", "/usr/bin/git log"));
        // `gitk` is a different base command even though `git` is its prefix.
        assert!(!matches_command("git", "gitk"));
        assert!(!matches_command("git", "gitk --all"));
    }

    #[test]
    fn test_multi_token_prefix() {
        assert!(matches_command("git status", "git status"));
        assert!(matches_command("git status", "git status --short"));
        assert!(!matches_command("git status", "git statusx"));
        assert!(!matches_command("git status", "git stash"));
    }

    #[test]
    fn test_deny_prefix_with_boundary() {
        assert!(matches_deny("git push --force", "git push --force origin main"));
        assert!(matches_deny("git push --force", "git push --force"));
        assert!(!matches_deny("git push --force", "git push --force-with-lease"));
    }

    #[test]
    fn test_deny_matches_anywhere_on_word_boundary() {
        assert!(matches_deny("sudo", "true && sudo reboot"));
        assert!(!matches_deny("sudo", "echo pseudo-sudoku"));
        assert!(matches_deny("rm -rf /", "cd /tmp && rm -rf /"));
    }
}
