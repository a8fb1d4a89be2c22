// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use thiserror::Error;

/// Coarse classification of security errors, used by callers that need to
/// branch on failure class without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AccessDenied,
    InvalidUrl,
    SecurityBlocked,
    Timeout,
    Network,
    Auth,
    NotFound,
    Validation,
    RateLimit,
    Server,
    Transform,
    PathInjection,
    Config,
}

/// Errors produced by the security enforcement core.
///
/// Decision failures are always typed errors, never panics. Audit-destination
/// write failures are absorbed inside the pipeline and do not surface here.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Policy or boundary rejected the access.
    #[error("access denied: {tool} may not {action} {resource} ({reason})")]
    AccessDenied {
        tool: String,
        resource_type: String,
        resource: String,
        action: String,
        reason: String,
        profile: String,
    },

    /// Malformed URL or disallowed scheme.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// SSRF, DNS exfiltration signature, or forbidden header. The message
    /// never carries resolved addresses or internal hostnames.
    #[error("request blocked by security policy: {0}")]
    SecurityBlocked(String),

    /// Deadline exceeded. Retryable by the caller.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Dial or read failure. Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// Upstream 401/403.
    #[error("authentication failed (HTTP {status}): {suggestion}")]
    Auth { status: u16, suggestion: String },

    /// Upstream 404, or an unknown profile name.
    #[error("not found: {0}")]
    NotFound(String),

    /// Upstream 400/422, or invalid input to a check.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Upstream 429, or a local rate limit hit. Retryable.
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// Upstream 5xx. Retryable.
    #[error("server error (HTTP {status}): {suggestion}")]
    Server { status: u16, suggestion: String },

    /// Post-processing of a response body failed.
    #[error("transform failed: {0}")]
    Transform(String),

    /// Directory traversal or null byte detected in a path.
    #[error("path injection detected: {0}")]
    PathInjection(String),

    /// Invalid destination, profile, or builder input. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SecurityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SecurityError::AccessDenied { .. } => ErrorKind::AccessDenied,
            SecurityError::InvalidUrl(_) => ErrorKind::InvalidUrl,
            SecurityError::SecurityBlocked(_) => ErrorKind::SecurityBlocked,
            SecurityError::Timeout(_) => ErrorKind::Timeout,
            SecurityError::Network(_) => ErrorKind::Network,
            SecurityError::Auth { .. } => ErrorKind::Auth,
            SecurityError::NotFound(_) => ErrorKind::NotFound,
            SecurityError::Validation(_) => ErrorKind::Validation,
            SecurityError::RateLimit(_) => ErrorKind::RateLimit,
            SecurityError::Server { .. } => ErrorKind::Server,
            SecurityError::Transform(_) => ErrorKind::Transform,
            SecurityError::PathInjection(_) => ErrorKind::PathInjection,
            SecurityError::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether the caller may reasonably retry the operation.
    pub fn retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Timeout | ErrorKind::Network | ErrorKind::RateLimit | ErrorKind::Server
        )
    }

    /// Map an upstream HTTP status to the error taxonomy with suggestion text.
    pub fn from_http_status(status: u16) -> Option<Self> {
        match status {
            401 | 403 => Some(SecurityError::Auth {
                status,
                suggestion: "check credentials or API key configuration".to_string(),
            }),
            404 => Some(SecurityError::NotFound(
                "upstream returned HTTP 404; verify the URL path".to_string(),
            )),
            400 | 422 => Some(SecurityError::Validation(format!(
                "upstream rejected the request (HTTP {status}); verify the request body"
            ))),
            429 => Some(SecurityError::RateLimit(
                "upstream returned HTTP 429; back off and retry".to_string(),
            )),
            s if s >= 500 => Some(SecurityError::Server {
                status,
                suggestion: "upstream failure; retry with backoff".to_string(),
            }),
            _ => None,
        }
    }
}
