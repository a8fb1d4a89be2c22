// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Audit events. Free-text fields are truncated and stripped of control
// characters at construction so a hostile tool input can never inject log
// lines or oversized records into a destination. Once handed to the audit
// pipeline an event is never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of the `resource` field.
pub const MAX_RESOURCE_LEN: usize = 1024;
/// Maximum length of the `reason` field.
pub const MAX_REASON_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AccessGranted,
    AccessDenied,
    Violation,
    SandboxEscapeAttempt,
    SandboxCreated,
    SandboxFallback,
    OverrideApplied,
    OverrideRevoked,
    OverrideExpired,
    RateLimited,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AccessGranted => "access_granted",
            EventType::AccessDenied => "access_denied",
            EventType::Violation => "violation",
            EventType::SandboxEscapeAttempt => "sandbox_escape_attempt",
            EventType::SandboxCreated => "sandbox_created",
            EventType::SandboxFallback => "sandbox_fallback",
            EventType::OverrideApplied => "override_applied",
            EventType::OverrideRevoked => "override_revoked",
            EventType::OverrideExpired => "override_expired",
            EventType::RateLimited => "rate_limited",
        }
    }
}

/// A single audit record.
///
/// Serialized field order is part of the wire contract; empty string fields
/// are omitted, `timestamp`, `event_type`, and `decision` always appear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub step_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
    pub decision: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub profile: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
}

impl SecurityEvent {
    pub fn new(event_type: EventType, decision: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            workflow_id: String::new(),
            step_id: String::new(),
            tool_name: String::new(),
            resource: String::new(),
            resource_type: String::new(),
            action: String::new(),
            decision: sanitize_field(&decision.into(), MAX_REASON_LEN),
            reason: String::new(),
            profile: String::new(),
            user_id: String::new(),
        }
    }

    pub fn workflow(mut self, workflow_id: impl Into<String>, step_id: impl Into<String>) -> Self {
        self.workflow_id = sanitize_field(&workflow_id.into(), MAX_REASON_LEN);
        self.step_id = sanitize_field(&step_id.into(), MAX_REASON_LEN);
        self
    }

    pub fn tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = sanitize_field(&tool_name.into(), MAX_REASON_LEN);
        self
    }

    pub fn resource(mut self, resource_type: impl Into<String>, resource: impl Into<String>) -> Self {
        self.resource_type = sanitize_field(&resource_type.into(), MAX_REASON_LEN);
        self.resource = sanitize_field(&resource.into(), MAX_RESOURCE_LEN);
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = sanitize_field(&action.into(), MAX_REASON_LEN);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = sanitize_field(&reason.into(), MAX_REASON_LEN);
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = sanitize_field(&profile.into(), MAX_REASON_LEN);
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = sanitize_field(&user_id.into(), MAX_REASON_LEN);
        self
    }

    /// Single-line rendering for the `text` destination format.
    pub fn to_text_line(&self) -> String {
        format!(
            "{} {} workflow={} step={} tool={} resource={} action={} decision={} reason={:?} profile={} user={}",
            self.timestamp.to_rfc3339(),
            self.event_type.as_str(),
            self.workflow_id,
            self.step_id,
            self.tool_name,
            self.resource,
            self.action,
            self.decision,
            self.reason,
            self.profile,
            self.user_id,
        )
    }
}

/// Strip control characters (below 0x20, keeping `\t`, `\n`, `\r`) and
/// truncate to `max` characters on a char boundary.
pub fn sanitize_field(value: &str, max: usize) -> String {
    let mut out = String::with_capacity(value.len().min(max));
    let mut kept = 0usize;
    for ch in value.chars() {
        if kept >= max {
            break;
        }
        match ch {
            '\t' | '\n' | '\r' => {
                out.push(ch);
                kept += 1;
            }
            c if (c as u32) < 32 => {}
            c => {
                out.push(c);
                kept += 1;
            }
        }
    }
    out
}
