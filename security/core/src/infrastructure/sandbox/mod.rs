// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Sandbox backends. The workflow security context asks for a sandbox
//! through a factory chain: the container factory first, the process
//! factory as a degraded fallback. Backends only implement mechanics;
//! selection, fallback events, and metrics live with the context.

pub mod container;
pub mod process;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::domain::error::SecurityError;
use crate::domain::profile::ResourceLimits;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxKind {
    Container,
    Process,
}

impl SandboxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxKind::Container => "container",
            SandboxKind::Process => "process",
        }
    }
}

/// What the context wants from a sandbox.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    pub workflow_id: String,
    /// Container image for the container backend.
    pub image: String,
    pub env: HashMap<String, String>,
    pub limits: ResourceLimits,
    /// Detach the sandbox from the network entirely.
    pub network_disabled: bool,
}

impl SandboxSpec {
    pub fn for_workflow(workflow_id: impl Into<String>, limits: ResourceLimits) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            image: "alpine:3.20".to_string(),
            env: HashMap::new(),
            limits,
            network_disabled: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SandboxOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> SandboxKind;

    async fn execute(
        &self,
        command: &[String],
        timeout: Duration,
    ) -> Result<SandboxOutput, SecurityError>;

    /// Tear the sandbox down. Must tolerate being called on an already
    /// destroyed instance.
    async fn destroy(&self) -> Result<(), SecurityError>;
}

#[async_trait]
pub trait SandboxFactory: Send + Sync {
    fn kind(&self) -> SandboxKind;

    /// Cheap health probe used during factory selection.
    async fn is_available(&self) -> bool;

    async fn create(&self, spec: &SandboxSpec) -> Result<Box<dyn Sandbox>, SecurityError>;
}
