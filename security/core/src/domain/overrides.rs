// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The capability a time-bounded override relaxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverrideType {
    /// Skip all access checks (still audited).
    DisableEnforcement,
    /// Run workflows without a sandbox even when the profile demands one.
    DisableSandbox,
    /// Stop emitting audit events.
    DisableAudit,
}

impl OverrideType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideType::DisableEnforcement => "disable-enforcement",
            OverrideType::DisableSandbox => "disable-sandbox",
            OverrideType::DisableAudit => "disable-audit",
        }
    }
}

/// A time-bounded, audited relaxation of enforcement for one capability.
///
/// `expires_at` is strictly after `applied_at`; a grant is observed as active
/// iff `now < expires_at` and it has not been revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOverride {
    #[serde(rename = "type")]
    pub override_type: OverrideType,
    pub reason: String,
    pub applied_by: String,
    pub applied_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PolicyOverride {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_override_type_serialization() {
        let json = serde_json::to_string(&OverrideType::DisableEnforcement).unwrap();
        assert_eq!(json, "\"disable-enforcement\"");
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let grant = PolicyOverride {
            override_type: OverrideType::DisableSandbox,
            reason: "incident 4711".to_string(),
            applied_by: "oncall".to_string(),
            applied_at: now,
            expires_at: now + Duration::seconds(60),
        };
        assert!(!grant.is_expired_at(now));
        assert!(!grant.is_expired_at(now + Duration::seconds(59)));
        assert!(grant.is_expired_at(now + Duration::seconds(60)));
    }
}
