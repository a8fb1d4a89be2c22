// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::query_parameters::{
    CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::models::ContainerCreateBody as Config;
use bollard::Docker;
use futures::StreamExt;
use std::time::Duration;
use tracing::info;

use crate::domain::error::SecurityError;

use super::{Sandbox, SandboxFactory, SandboxKind, SandboxOutput, SandboxSpec};

/// Docker-backed sandbox factory.
pub struct ContainerSandboxFactory {
    docker: Docker,
}

impl ContainerSandboxFactory {
    pub fn new(socket_path: Option<String>) -> Result<Self, SecurityError> {
        let docker = match socket_path {
            Some(path) => {
                #[cfg(unix)]
                let result = Docker::connect_with_unix(&path, 120, bollard::API_DEFAULT_VERSION);
                #[cfg(windows)]
                let result =
                    Docker::connect_with_named_pipe(&path, 120, bollard::API_DEFAULT_VERSION);
                result.map_err(|e| {
                    SecurityError::Config(format!("cannot connect to Docker at {path}: {e}"))
                })?
            }
            None => Docker::connect_with_local_defaults()
                .map_err(|e| SecurityError::Config(format!("cannot connect to Docker: {e}")))?,
        };
        Ok(Self { docker })
    }
}

#[async_trait]
impl SandboxFactory for ContainerSandboxFactory {
    fn kind(&self) -> SandboxKind {
        SandboxKind::Container
    }

    async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<Box<dyn Sandbox>, SecurityError> {
        let mut host_config = bollard::service::HostConfig {
            network_mode: spec.network_disabled.then(|| "none".to_string()),
            ..Default::default()
        };
        if spec.limits.max_memory > 0 {
            host_config.memory = Some(spec.limits.max_memory as i64);
        }
        if spec.limits.max_processes > 0 {
            host_config.pids_limit = Some(spec.limits.max_processes as i64);
        }

        let env_vars: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let options = CreateContainerOptions {
            name: Some(format!("conductor-sandbox-{}", uuid::Uuid::new_v4())),
            ..Default::default()
        };

        // Keep the container alive; actual commands run through exec.
        let cmd = vec!["tail".to_string(), "-f".to_string(), "/dev/null".to_string()];

        let container_config = Config {
            image: Some(spec.image.clone()),
            tty: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(cmd),
            env: Some(env_vars),
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| SecurityError::Config(format!("sandbox container create failed: {e}")))?;

        self.docker
            .start_container(&created.id, None::<StartContainerOptions>)
            .await
            .map_err(|e| SecurityError::Config(format!("sandbox container start failed: {e}")))?;

        info!(container = %created.id, workflow = %spec.workflow_id, "sandbox container started");
        Ok(Box::new(ContainerSandbox {
            docker: self.docker.clone(),
            id: created.id,
        }))
    }
}

pub struct ContainerSandbox {
    docker: Docker,
    id: String,
}

#[async_trait]
impl Sandbox for ContainerSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SandboxKind {
        SandboxKind::Container
    }

    async fn execute(
        &self,
        command: &[String],
        timeout: Duration,
    ) -> Result<SandboxOutput, SecurityError> {
        let exec_config = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(command.to_vec()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(&self.id, exec_config)
            .await
            .map_err(|e| SecurityError::Network(format!("sandbox exec create failed: {e}")))?;

        let start_opts = StartExecOptions {
            detach: false,
            ..Default::default()
        };

        let started = self
            .docker
            .start_exec(&exec.id, Some(start_opts))
            .await
            .map_err(|e| SecurityError::Network(format!("sandbox exec start failed: {e}")))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = started {
            let drain = async {
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        _ => {}
                    }
                }
            };
            tokio::time::timeout(timeout, drain)
                .await
                .map_err(|_| SecurityError::Timeout(timeout))?;
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| SecurityError::Network(format!("sandbox exec inspect failed: {e}")))?;

        Ok(SandboxOutput {
            stdout,
            stderr,
            exit_code: inspect.exit_code.unwrap_or(0),
        })
    }

    async fn destroy(&self) -> Result<(), SecurityError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(&self.id, Some(options)).await {
            Ok(()) => {
                info!(container = %self.id, "sandbox container removed");
                Ok(())
            }
            // Already gone: destroy is idempotent.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(SecurityError::Network(format!(
                "sandbox container remove failed: {e}"
            ))),
        }
    }
}
