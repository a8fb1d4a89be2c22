// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Time-bounded policy overrides. Every grant names a capability, a reason,
//! and an operator; expiry is enforced on read (`is_active`) so a dead
//! sweeper can never extend a bypass. The sweeper only reclaims memory and
//! emits the expiry audit trail.

use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::OverrideConfig;
use crate::domain::error::SecurityError;
use crate::domain::event::{EventType, SecurityEvent};
use crate::domain::overrides::{OverrideType, PolicyOverride};
use crate::infrastructure::audit::AuditPipeline;

pub struct OverrideManager {
    config: OverrideConfig,
    grants: Mutex<HashMap<OverrideType, PolicyOverride>>,
    audit: Arc<AuditPipeline>,
}

impl OverrideManager {
    pub fn new(config: OverrideConfig, audit: Arc<AuditPipeline>) -> Self {
        Self {
            config,
            grants: Mutex::new(HashMap::new()),
            audit,
        }
    }

    /// Grant a bypass for one capability. `ttl` defaults to the configured
    /// default and is clamped to the configured maximum.
    pub fn apply(
        &self,
        override_type: OverrideType,
        reason: &str,
        applied_by: &str,
        ttl: Option<Duration>,
    ) -> Result<PolicyOverride, SecurityError> {
        if !self.config.enabled {
            return Err(SecurityError::Validation(
                "policy overrides are disabled by configuration".into(),
            ));
        }
        if self.config.require_reason && reason.trim().is_empty() {
            return Err(SecurityError::Validation(
                "an override requires a non-empty reason".into(),
            ));
        }
        if applied_by.trim().is_empty() {
            return Err(SecurityError::Validation(
                "an override requires a non-empty applied_by".into(),
            ));
        }
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        if ttl.is_zero() {
            return Err(SecurityError::Validation(
                "an override requires a positive ttl".into(),
            ));
        }
        let ttl = ttl.min(self.config.max_ttl);

        let now = Utc::now();
        let grant = PolicyOverride {
            override_type,
            reason: reason.trim().to_string(),
            applied_by: applied_by.trim().to_string(),
            applied_at: now,
            expires_at: now
                + ChronoDuration::from_std(ttl)
                    .map_err(|_| SecurityError::Validation("ttl out of range".into()))?,
        };

        self.grants.lock().insert(override_type, grant.clone());
        info!(
            override_type = override_type.as_str(),
            applied_by = %grant.applied_by,
            expires_at = %grant.expires_at,
            "policy override applied"
        );
        self.audit.log(
            SecurityEvent::new(EventType::OverrideApplied, "applied")
                .resource("override", override_type.as_str())
                .reason(grant.reason.clone())
                .user(grant.applied_by.clone()),
        );
        Ok(grant)
    }

    /// An override is observed as active iff an unexpired, unrevoked grant
    /// exists for the capability.
    pub fn is_active(&self, override_type: OverrideType) -> bool {
        self.grants
            .lock()
            .get(&override_type)
            .is_some_and(|g| !g.is_expired_at(Utc::now()))
    }

    /// Active grant details, for reporting.
    pub fn active_grant(&self, override_type: OverrideType) -> Option<PolicyOverride> {
        self.grants
            .lock()
            .get(&override_type)
            .filter(|g| !g.is_expired_at(Utc::now()))
            .cloned()
    }

    /// Delete a grant. Emits a revocation event, plus a `revoked_early`
    /// event when the grant had time left.
    pub fn revoke(&self, override_type: OverrideType) -> bool {
        let removed = self.grants.lock().remove(&override_type);
        let Some(grant) = removed else { return false };

        self.audit.log(
            SecurityEvent::new(EventType::OverrideRevoked, "revoked")
                .resource("override", override_type.as_str())
                .user(grant.applied_by.clone()),
        );
        if !grant.is_expired_at(Utc::now()) {
            self.audit.log(
                SecurityEvent::new(EventType::OverrideRevoked, "revoked_early")
                    .resource("override", override_type.as_str())
                    .reason(format!(
                        "revoked {}s before expiry",
                        (grant.expires_at - Utc::now()).num_seconds().max(0)
                    ))
                    .user(grant.applied_by.clone()),
            );
        }
        true
    }

    /// Remove expired grants and emit their expiry events. Returns how many
    /// were reclaimed.
    pub fn cleanup(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<PolicyOverride> = {
            let mut grants = self.grants.lock();
            let keys: Vec<OverrideType> = grants
                .iter()
                .filter(|(_, g)| g.is_expired_at(now))
                .map(|(k, _)| *k)
                .collect();
            keys.iter().filter_map(|k| grants.remove(k)).collect()
        };
        for grant in &expired {
            self.audit.log(
                SecurityEvent::new(EventType::OverrideExpired, "expired")
                    .resource("override", grant.override_type.as_str())
                    .user(grant.applied_by.clone()),
            );
        }
        expired.len()
    }
}

/// Run `cleanup` every minute until the returned token is cancelled.
pub fn spawn_override_sweeper(manager: Arc<OverrideManager>) -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => {
                    let reclaimed = manager.cleanup();
                    if reclaimed > 0 {
                        info!(reclaimed, "expired policy overrides cleaned up");
                    }
                }
            }
        }
    });
    cancel
}
