// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Path canonicalization and glob matching.
//!
//! Every path crosses the same pipeline before it is compared to anything:
//! variable expansion (`$cwd`, `$temp`), home expansion (`~`), absolutization
//! against the recorded working directory, lexical normalization, then
//! symlink resolution. A non-existent tail resolves the longest existing
//! ancestor and appends the remainder, so a decision about a file that is
//! about to be created still sees through symlinked parents.
//!
//! Patterns go through the identical transform at construction time and are
//! compiled once; matching itself is pure string work.

use globset::{GlobBuilder, GlobMatcher};
use std::path::{Component, Path, PathBuf};

use crate::domain::error::SecurityError;

/// Expansion context recorded at checker construction.
#[derive(Debug, Clone)]
pub struct PathResolver {
    cwd: PathBuf,
    temp: PathBuf,
    home: Option<PathBuf>,
}

impl PathResolver {
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            temp: std::env::temp_dir(),
            home: dirs::home_dir(),
        }
    }

    /// Resolver rooted at the process working directory.
    pub fn from_process_env() -> Result<Self, SecurityError> {
        let cwd = std::env::current_dir()
            .map_err(|e| SecurityError::Config(format!("cannot determine working directory: {e}")))?;
        Ok(Self::new(cwd))
    }

    #[cfg(test)]
    pub fn with_home(mut self, home: PathBuf) -> Self {
        self.home = Some(home);
        self
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Expand `$cwd`, `$temp`, and `~`, then absolutize against the recorded
    /// working directory. Purely textual; no filesystem access.
    pub fn expand(&self, input: &str) -> Result<PathBuf, SecurityError> {
        if input.contains('\0') {
            return Err(SecurityError::PathInjection("path contains null byte".into()));
        }

        let expanded = if let Some(rest) = strip_variable(input, "$cwd") {
            join_fragment(&self.cwd, rest)
        } else if let Some(rest) = strip_variable(input, "$temp") {
            join_fragment(&self.temp, rest)
        } else if input == "~" {
            self.home
                .clone()
                .ok_or_else(|| SecurityError::Config("home directory unavailable".into()))?
        } else if let Some(rest) = input.strip_prefix("~/") {
            let home = self
                .home
                .clone()
                .ok_or_else(|| SecurityError::Config("home directory unavailable".into()))?;
            home.join(rest)
        } else {
            PathBuf::from(input)
        };

        let absolute = if expanded.is_absolute() {
            expanded
        } else {
            self.cwd.join(expanded)
        };
        Ok(lexical_clean(&absolute))
    }

    /// Full canonicalization: expansion plus symlink resolution.
    ///
    /// The longest existing ancestor is canonicalized through the OS (which
    /// follows symlinks with its own bound); the non-existent remainder is
    /// appended lexically. Idempotent: resolving an already-resolved path
    /// yields the same path.
    pub fn resolve(&self, input: &str) -> Result<PathBuf, SecurityError> {
        let absolute = self.expand(input)?;
        Ok(resolve_existing_prefix(&absolute))
    }
}

/// `$cwd` or `$cwd/...`, but never `$cwdfoo`.
fn strip_variable<'a>(input: &'a str, name: &str) -> Option<&'a str> {
    let rest = input.strip_prefix(name)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

fn join_fragment(base: &Path, fragment: &str) -> PathBuf {
    let trimmed = fragment.trim_start_matches('/');
    if trimmed.is_empty() {
        base.to_path_buf()
    } else {
        base.join(trimmed)
    }
}

/// `filepath.Clean`-style normalization: drops `.`, resolves `..` textually,
/// collapses separators. `..` at the root stays at the root.
pub fn lexical_clean(path: &Path) -> PathBuf {
    let rooted = path.has_root();
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                // Pop a normal component. Climbing above the root of an
                // absolute path stays at the root; a relative path
                // accumulates leading `..`.
                let popped = match out.components().next_back() {
                    Some(Component::Normal(_)) => out.pop(),
                    _ => false,
                };
                if !popped && !rooted {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Canonicalize the longest existing ancestor of `path` and append the
/// remainder. The result contains no symlinks in any existing component.
pub fn resolve_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut remainder: Vec<&std::ffi::OsStr> = Vec::new();
    loop {
        match std::fs::canonicalize(existing) {
            Ok(resolved) => {
                let mut out = resolved;
                for part in remainder.iter().rev() {
                    out.push(part);
                }
                return lexical_clean(&out);
            }
            Err(_) => match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    remainder.push(name);
                    existing = parent;
                }
                _ => return lexical_clean(path),
            },
        }
    }
}

/// A compiled filesystem pattern: the original text plus the resolved glob.
#[derive(Debug, Clone)]
pub struct PathPattern {
    original: String,
    resolved: String,
    matcher: GlobMatcher,
}

impl PathPattern {
    /// Compile a pattern through the same expansion pipeline as paths.
    /// The literal (pre-glob) prefix is symlink-resolved so that patterns and
    /// candidate paths compare in the same canonical namespace.
    pub fn compile(pattern: &str, resolver: &PathResolver) -> Result<Self, SecurityError> {
        let expanded = resolver.expand(pattern)?;
        let resolved = resolve_pattern_prefix(&expanded);
        let glob_text = resolved.to_string_lossy().into_owned();

        let matcher = GlobBuilder::new(&glob_text)
            .literal_separator(true)
            .build()
            .map_err(|e| SecurityError::Config(format!("invalid path pattern {pattern:?}: {e}")))?
            .compile_matcher();

        Ok(Self {
            original: pattern.to_string(),
            resolved: glob_text,
            matcher,
        })
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn resolved(&self) -> &str {
        &self.resolved
    }

    /// Match an already-resolved candidate path.
    ///
    /// A pattern without glob metacharacters also matches everything beneath
    /// it, so `read: ["/data"]` grants the whole tree.
    pub fn matches(&self, resolved_path: &Path) -> bool {
        if self.matcher.is_match(resolved_path) {
            return true;
        }
        if !has_glob_meta(&self.resolved) {
            return resolved_path.starts_with(&self.resolved);
        }
        false
    }
}

fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// Symlink-resolve only the leading components that contain no glob
/// metacharacters; the glob tail is appended untouched.
fn resolve_pattern_prefix(expanded: &Path) -> PathBuf {
    let mut literal = PathBuf::new();
    let mut tail: Vec<&std::ffi::OsStr> = Vec::new();
    let mut in_tail = false;
    for component in expanded.components() {
        let text = component.as_os_str().to_string_lossy();
        if !in_tail && has_glob_meta(&text) {
            in_tail = true;
        }
        if in_tail {
            tail.push(component.as_os_str());
        } else {
            literal.push(component.as_os_str());
        }
    }
    if literal.as_os_str().is_empty() {
        return expanded.to_path_buf();
    }
    let mut out = resolve_existing_prefix(&literal);
    for part in tail {
        out.push(part);
    }
    out
}
