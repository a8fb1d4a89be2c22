// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Persisted per-workflow permission grants, keyed by the SHA-256 of the
// workflow content so an edited workflow never inherits an old grant. Grants
// expire 90 days after they are given and can be revoked without deleting
// the record (the tombstone blocks silent re-grant prompts from looking
// fresh).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::access::AccessConfig;
use crate::domain::error::SecurityError;
use crate::infrastructure::secure_file::write_file_atomic;

const GRANT_VALIDITY_DAYS: i64 = 90;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub workflow_hash: String,
    pub workflow_name: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub permissions: AccessConfig,
    #[serde(default)]
    pub revoked: bool,
}

impl PermissionGrant {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && now < self.expires_at
    }
}

/// On-disk store at `~/.config/conductor/permissions.yaml`, written
/// atomically with owner-only permissions.
pub struct PermissionsStore {
    path: PathBuf,
    grants: HashMap<String, PermissionGrant>,
}

impl PermissionsStore {
    pub fn default_path() -> Result<PathBuf, SecurityError> {
        let home = dirs::home_dir()
            .ok_or_else(|| SecurityError::Config("home directory unavailable".into()))?;
        Ok(home.join(".config/conductor/permissions.yaml"))
    }

    pub fn open_default() -> Result<Self, SecurityError> {
        Self::open(&Self::default_path()?)
    }

    pub fn open(path: &Path) -> Result<Self, SecurityError> {
        let grants = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                SecurityError::Config(format!("cannot read {}: {e}", path.display()))
            })?;
            serde_yaml::from_str(&raw).map_err(|e| {
                SecurityError::Config(format!("corrupt permissions store {}: {e}", path.display()))
            })?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            grants,
        })
    }

    /// Content hash identifying a workflow version.
    pub fn hash_workflow(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hex::encode(hasher.finalize())
    }

    /// Record a grant for a workflow version, valid for 90 days.
    pub fn grant(
        &mut self,
        workflow_hash: &str,
        workflow_name: &str,
        permissions: AccessConfig,
    ) -> Result<&PermissionGrant, SecurityError> {
        let now = Utc::now();
        let grant = PermissionGrant {
            workflow_hash: workflow_hash.to_string(),
            workflow_name: workflow_name.to_string(),
            granted_at: now,
            expires_at: now + Duration::days(GRANT_VALIDITY_DAYS),
            permissions,
            revoked: false,
        };
        self.grants.insert(workflow_hash.to_string(), grant);
        self.save()?;
        Ok(&self.grants[workflow_hash])
    }

    /// Record a standing denial for a workflow version.
    pub fn deny(&mut self, workflow_hash: &str, workflow_name: &str) -> Result<(), SecurityError> {
        let now = Utc::now();
        self.grants.insert(
            workflow_hash.to_string(),
            PermissionGrant {
                workflow_hash: workflow_hash.to_string(),
                workflow_name: workflow_name.to_string(),
                granted_at: now,
                expires_at: now + Duration::days(GRANT_VALIDITY_DAYS),
                permissions: AccessConfig::default(),
                revoked: true,
            },
        );
        self.save()
    }

    /// Active grant for a workflow version, if any.
    pub fn lookup(&self, workflow_hash: &str) -> Option<&PermissionGrant> {
        self.grants
            .get(workflow_hash)
            .filter(|g| g.is_valid_at(Utc::now()))
    }

    /// Standing denial for a workflow version ("never" answers persist).
    pub fn is_denied(&self, workflow_hash: &str) -> bool {
        self.grants
            .get(workflow_hash)
            .is_some_and(|g| g.revoked && Utc::now() < g.expires_at)
    }

    pub fn revoke(&mut self, workflow_hash: &str) -> Result<bool, SecurityError> {
        match self.grants.get_mut(workflow_hash) {
            Some(grant) if !grant.revoked => {
                grant.revoked = true;
                self.save()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Drop expired records; returns how many were removed.
    pub fn prune_expired(&mut self) -> Result<usize, SecurityError> {
        let now = Utc::now();
        let before = self.grants.len();
        self.grants.retain(|_, g| now < g.expires_at);
        let removed = before - self.grants.len();
        if removed > 0 {
            self.save()?;
        }
        Ok(removed)
    }

    fn save(&self) -> Result<(), SecurityError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SecurityError::Config(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let yaml = serde_yaml::to_string(&self.grants)
            .map_err(|e| SecurityError::Transform(format!("permissions serialization: {e}")))?;
        write_file_atomic(&self.path, yaml.as_bytes(), 0o600)
    }
}
