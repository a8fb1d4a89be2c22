// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Process-isolation fallback: no container, just child processes with a
// scrubbed environment and a private scratch directory. Weaker than the
// container backend; contexts that land here are marked degraded and policy
// enforcement carries the weight.

use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tracing::info;

use crate::domain::error::SecurityError;

use super::{Sandbox, SandboxFactory, SandboxKind, SandboxOutput, SandboxSpec};

pub struct ProcessSandboxFactory;

#[async_trait]
impl SandboxFactory for ProcessSandboxFactory {
    fn kind(&self) -> SandboxKind {
        SandboxKind::Process
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<Box<dyn Sandbox>, SecurityError> {
        let scratch = TempDir::with_prefix("conductor-sandbox-")
            .map_err(|e| SecurityError::Config(format!("sandbox scratch dir: {e}")))?;
        let id = format!("process-{}", uuid::Uuid::new_v4());
        info!(sandbox = %id, workflow = %spec.workflow_id, "process sandbox created");
        Ok(Box::new(ProcessSandbox {
            id,
            env: spec.env.clone(),
            scratch,
        }))
    }
}

pub struct ProcessSandbox {
    id: String,
    env: HashMap<String, String>,
    scratch: TempDir,
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SandboxKind {
        SandboxKind::Process
    }

    async fn execute(
        &self,
        command: &[String],
        timeout: Duration,
    ) -> Result<SandboxOutput, SecurityError> {
        let Some((program, args)) = command.split_first() else {
            return Err(SecurityError::Validation("empty sandbox command".into()));
        };

        let child = tokio::process::Command::new(program)
            .args(args)
            .env_clear()
            .envs(&self.env)
            .current_dir(self.scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SecurityError::Network(format!("sandbox spawn failed: {e}")))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| SecurityError::Timeout(timeout))?
            .map_err(|e| SecurityError::Network(format!("sandbox wait failed: {e}")))?;

        Ok(SandboxOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1) as i64,
        })
    }

    async fn destroy(&self) -> Result<(), SecurityError> {
        // Scratch directory is removed when the TempDir drops; nothing else
        // to tear down.
        Ok(())
    }
}
