//! Docker engine implementation of [`ContainerRuntime`] over bollard.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    WaitContainerOptions,
};
use bollard::models::{
    HostConfig, HostConfigLogConfig, Mount, MountTypeEnum, RestartPolicy, RestartPolicyNameEnum,
};
use bollard::Docker;
use futures::StreamExt;
use tracing::debug;

use super::error::RuntimeError;
use super::runtime::{ContainerRuntime, ContainerSpec, LogStreams};

/// Network mode that gives a container no interfaces besides loopback.
pub const NETWORK_MODE_NONE: &str = "none";

const LOG_DRIVER: &str = "json-file";

/// Docker engine client, one per executor.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the platform defaults (`DOCKER_HOST` or the local socket).
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

/// Host configuration for a tool container: explicit removal, no network,
/// no restarts, json-file logs so output survives until removal.
pub fn host_config(spec: &ContainerSpec) -> HostConfig {
    let mounts = spec
        .mounts
        .iter()
        .map(|m| Mount {
            target: Some(m.target.clone()),
            source: Some(m.source.to_string_lossy().into_owned()),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(m.read_only),
            ..Default::default()
        })
        .collect();

    HostConfig {
        mounts: Some(mounts),
        auto_remove: Some(false),
        network_mode: Some(NETWORK_MODE_NONE.to_string()),
        restart_policy: Some(RestartPolicy {
            name: Some(RestartPolicyNameEnum::NO),
            maximum_retry_count: None,
        }),
        log_config: Some(HostConfigLogConfig {
            typ: Some(LOG_DRIVER.to_string()),
            config: None,
        }),
        memory: spec.memory_bytes,
        nano_cpus: spec.nano_cpus,
        ..Default::default()
    }
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
    Config {
        image: Some(spec.image.clone()),
        cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
        env: Some(spec.env.clone()),
        tty: Some(false),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        network_disabled: Some(true),
        host_config: Some(host_config(spec)),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(err) => match RuntimeError::from(err) {
                RuntimeError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn create(&self, name: &str, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await?;
        for warning in &response.warnings {
            debug!(container = %name, warning = %warning, "container create warning");
        }
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64, RuntimeError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error carrying the code.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(err)) => Err(err.into()),
            None => Err(RuntimeError::Api(format!(
                "wait stream for container {id} ended without a status"
            ))),
        }
    }

    async fn logs(&self, id: &str, streams: LogStreams) -> Result<String, RuntimeError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: streams == LogStreams::Combined,
            follow: false,
            ..Default::default()
        };
        let mut stream = self.docker.logs(id, Some(options));
        let mut buf = Vec::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?.into_bytes());
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::runtime::BindMount;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            image: "alpine:3.20".into(),
            cmd: vec!["cat".into(), "/workspace/input.txt".into()],
            env: vec!["MODE=test".into()],
            mounts: vec![
                BindMount::read_only("/tmp/x/input", "/workspace/input.txt"),
                BindMount::read_write("/tmp/shared", "/shared"),
            ],
            memory_bytes: Some(64 * 1024 * 1024),
            nano_cpus: Some(500_000_000),
        }
    }

    #[test]
    fn test_host_config_isolates_network() {
        let hc = host_config(&spec());
        assert_eq!(hc.network_mode.as_deref(), Some(NETWORK_MODE_NONE));
        assert_eq!(hc.auto_remove, Some(false));
        assert_eq!(
            hc.restart_policy.and_then(|p| p.name),
            Some(RestartPolicyNameEnum::NO)
        );
        assert_eq!(
            hc.log_config.and_then(|l| l.typ).as_deref(),
            Some("json-file")
        );
    }

    #[test]
    fn test_host_config_limits_and_mounts() {
        let hc = host_config(&spec());
        assert_eq!(hc.memory, Some(64 * 1024 * 1024));
        assert_eq!(hc.nano_cpus, Some(500_000_000));

        let mounts = hc.mounts.unwrap();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].typ, Some(MountTypeEnum::BIND));
        assert_eq!(mounts[0].read_only, Some(true));
        assert_eq!(mounts[1].target.as_deref(), Some("/shared"));
        assert_eq!(mounts[1].read_only, Some(false));
    }

    #[test]
    fn test_container_config_attaches_output_without_tty() {
        let cfg = container_config(&spec());
        assert_eq!(cfg.tty, Some(false));
        assert_eq!(cfg.attach_stdout, Some(true));
        assert_eq!(cfg.attach_stderr, Some(true));
        assert_eq!(cfg.network_disabled, Some(true));
        assert_eq!(cfg.env, Some(vec!["MODE=test".to_string()]));
    }
}
