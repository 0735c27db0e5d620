//! Docker/Podman engine backed by bollard.
//!
//! bollard is async; the executor is not. [`DockerEngine`] keeps a handle to the
//! tokio runtime it was connected on and blocks on that runtime for every engine
//! call, so its methods must be called from a blocking thread (for example the
//! worker used by [`ContainerExecutor::run_async`](super::ContainerExecutor::run_async)),
//! never from inside an async task.

use crate::container::{
    ContainerDetails, ContainerEngine, ContainerHandle, ContainerSpec, EngineError, Result,
    RunnerError,
};
use bollard::Docker;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, CreateImageOptionsBuilder, InspectContainerOptions,
    LogsOptionsBuilder, RemoveContainerOptionsBuilder, StartContainerOptions,
    StopContainerOptionsBuilder, WaitContainerOptions,
};
use chrono::{DateTime, Utc};
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Docker engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Explicit daemon address (`unix:///var/run/docker.sock`, `tcp://host:2375`)
    pub docker_host: Option<String>,
    /// Connection timeout in seconds
    pub timeout: u64,
    /// Grace period in seconds before a stopped container is killed
    pub stop_timeout: i32,
    /// Pull images that are missing locally before creating a container
    pub auto_pull: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            docker_host: None,
            timeout: 120,
            stop_timeout: 10,
            auto_pull: true,
        }
    }
}

/// Container engine talking to a Docker or Podman daemon.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
    runtime: Handle,
    config: EngineConfig,
}

impl DockerEngine {
    /// Connect to the container runtime and verify it answers.
    ///
    /// Must be called from within a tokio runtime; that runtime drives every
    /// later engine call.
    ///
    /// # Errors
    ///
    /// Returns error if neither Docker nor Podman is reachable.
    pub async fn connect(config: EngineConfig) -> Result<Self> {
        let docker = Self::connect_docker(&config)?;
        let engine = Self {
            docker,
            runtime: Handle::current(),
            config,
        };

        engine.ping().await?;
        Ok(engine)
    }

    /// Wrap an existing bollard client.
    pub fn with_docker(docker: Docker, runtime: Handle, config: EngineConfig) -> Self {
        Self {
            docker,
            runtime,
            config,
        }
    }

    /// Connect to Docker or Podman daemon.
    ///
    /// Tries multiple connection strategies in order:
    /// 1. The configured `docker_host`, if any
    /// 2. Local defaults (Unix socket or Windows named pipe, honoring DOCKER_HOST)
    /// 3. Podman sockets (rootless, then system)
    fn connect_docker(config: &EngineConfig) -> Result<Docker> {
        if let Some(host) = &config.docker_host {
            debug!("Connecting to configured container runtime at {}", host);
            let docker = if host.starts_with("tcp://") || host.starts_with("http://") {
                Docker::connect_with_http(host, config.timeout, bollard::API_DEFAULT_VERSION)
            } else {
                Docker::connect_with_socket(host, config.timeout, bollard::API_DEFAULT_VERSION)
            };
            return docker.map_err(|e| {
                RunnerError::Config(format!("Failed to connect to {}: {}", host, e))
            });
        }

        debug!("Attempting to connect to container runtime...");

        match Docker::connect_with_local_defaults() {
            Ok(docker) => {
                info!("Connected to container runtime via local defaults");
                return Ok(docker);
            }
            Err(e) => {
                debug!("Local defaults failed: {}", e);
            }
        }

        #[cfg(unix)]
        {
            let mut sockets = Vec::new();
            if let Ok(home) = std::env::var("HOME") {
                sockets.push(format!("unix://{}/run/podman/podman.sock", home));
            }
            sockets.push("unix:///run/podman/podman.sock".to_string());

            for socket in sockets {
                debug!("Trying Podman socket: {}", socket);
                match Docker::connect_with_socket(
                    &socket,
                    config.timeout,
                    bollard::API_DEFAULT_VERSION,
                ) {
                    Ok(docker) => {
                        info!("Connected to Podman via {}", socket);
                        return Ok(docker);
                    }
                    Err(e) => {
                        debug!("Podman socket {} failed: {}", socket, e);
                    }
                }
            }
        }

        Err(RunnerError::Config(
            "Failed to connect to Docker or Podman. Please ensure Docker or Podman is installed and running.".to_string(),
        ))
    }

    /// Ping the container runtime to verify connectivity.
    ///
    /// # Errors
    ///
    /// Returns error if ping fails.
    pub async fn ping(&self) -> Result<()> {
        self.docker.ping().await.map_err(|e| {
            RunnerError::Config(format!("Failed to ping container runtime: {}", e))
        })?;
        debug!("Container runtime ping successful");
        Ok(())
    }

    /// Get the underlying Docker client.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Pull `image` unless it is already present locally.
    async fn ensure_image(&self, image: &str) -> std::result::Result<(), EngineError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => {
                debug!("Image {} already exists locally", image);
                return Ok(());
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(EngineError::Api(e)),
        }

        let (from_image, tag) = split_image_tag(image);
        info!("Pulling image: {}:{}", from_image, tag);

        let mut options = CreateImageOptionsBuilder::new().from_image(from_image);
        if !tag.is_empty() {
            options = options.tag(tag);
        }
        let mut stream = self.docker.create_image(Some(options.build()), None, None);

        while let Some(result) = stream.next().await {
            let info = result?;
            if let Some(status) = info.status {
                debug!("Pull status: {}", status);
            }
        }

        info!("Successfully pulled image: {}", image);
        Ok(())
    }

    async fn create_and_start_async(
        &self,
        spec: &ContainerSpec,
    ) -> std::result::Result<ContainerHandle, EngineError> {
        if self.config.auto_pull {
            self.ensure_image(&spec.image).await?;
        }

        let options = spec
            .name
            .as_deref()
            .map(|name| CreateContainerOptionsBuilder::new().name(name).build());

        let host_config = HostConfig {
            binds: Some(spec.binds()),
            memory: Some(spec.memory_bytes),
            nano_cpus: Some(spec.nano_cpus),
            auto_remove: Some(spec.auto_remove),
            ..Default::default()
        };

        let labels: HashMap<String, String> = spec
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            env: Some(spec.env_list()),
            working_dir: Some(spec.working_dir.clone()),
            user: Some(spec.user.clone()),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self.docker.create_container(options, body).await?;
        let handle = ContainerHandle::new(response.id, spec.name.clone());
        debug!("Created container {}", handle.short_id());

        if let Err(e) = self
            .docker
            .start_container(&handle.id, None::<StartContainerOptions>)
            .await
        {
            warn!(
                "Failed to start container {}, removing it: {}",
                handle.short_id(),
                e
            );
            if let Err(remove_err) = self.remove_async(&handle, true).await {
                warn!(
                    "Failed to remove unstarted container {}: {}",
                    handle.short_id(),
                    remove_err
                );
            }
            return Err(EngineError::Api(e));
        }

        info!("Started container {}", handle.short_id());
        Ok(handle)
    }

    async fn remove_async(
        &self,
        handle: &ContainerHandle,
        force: bool,
    ) -> std::result::Result<(), EngineError> {
        match self
            .docker
            .remove_container(
                &handle.id,
                Some(
                    RemoveContainerOptionsBuilder::new()
                        .force(force)
                        .v(true)
                        .build(),
                ),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} already removed", handle.short_id());
                Ok(())
            }
            Err(e) => Err(EngineError::Api(e)),
        }
    }
}

impl ContainerEngine for DockerEngine {
    fn create_and_start(
        &self,
        spec: &ContainerSpec,
    ) -> std::result::Result<ContainerHandle, EngineError> {
        self.block_on(self.create_and_start_async(spec))
    }

    fn wait(
        &self,
        handle: &ContainerHandle,
        timeout: Duration,
    ) -> std::result::Result<i64, EngineError> {
        self.block_on(async {
            let mut stream = std::pin::pin!(self.docker.wait_container(
                &handle.id,
                None::<WaitContainerOptions>,
            ));

            match tokio::time::timeout(timeout, stream.next()).await {
                Err(_) => Err(EngineError::Timeout(timeout)),
                Ok(Some(Ok(response))) => Ok(response.status_code),
                // bollard reports non-zero exits as errors
                Ok(Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. }))) => {
                    Ok(code)
                }
                Ok(Some(Err(e))) => Err(map_not_found(e, handle)),
                Ok(None) => Err(EngineError::Other(format!(
                    "wait stream for container {} ended without a status",
                    handle.short_id()
                ))),
            }
        })
    }

    fn logs(&self, handle: &ContainerHandle) -> std::result::Result<Vec<u8>, EngineError> {
        self.block_on(async {
            let options = LogsOptionsBuilder::new()
                .stdout(true)
                .stderr(true)
                .tail("all")
                .build();
            let mut stream = self.docker.logs(&handle.id, Some(options));

            let mut output = Vec::new();
            while let Some(result) = stream.next().await {
                let log = result.map_err(|e| map_not_found(e, handle))?;
                output.extend_from_slice(&log.into_bytes());
            }
            Ok(output)
        })
    }

    fn remove(
        &self,
        handle: &ContainerHandle,
        force: bool,
    ) -> std::result::Result<(), EngineError> {
        self.block_on(self.remove_async(handle, force))
    }

    fn stop(&self, handle: &ContainerHandle) -> std::result::Result<(), EngineError> {
        self.block_on(async {
            match self
                .docker
                .stop_container(
                    &handle.id,
                    Some(
                        StopContainerOptionsBuilder::new()
                            .t(self.config.stop_timeout)
                            .build(),
                    ),
                )
                .await
            {
                Ok(()) => Ok(()),
                // Already stopped
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 304, ..
                }) => Ok(()),
                Err(e) => Err(map_not_found(e, handle)),
            }
        })
    }

    fn inspect(
        &self,
        handle: &ContainerHandle,
    ) -> std::result::Result<ContainerDetails, EngineError> {
        self.block_on(async {
            let inspect = self
                .docker
                .inspect_container(
                    &handle.id,
                    None::<InspectContainerOptions>,
                )
                .await
                .map_err(|e| map_not_found(e, handle))?;

            // Read through the serialized form so field types don't depend on
            // which date features bollard was built with.
            let raw = serde_json::to_value(&inspect)
                .map_err(|e| EngineError::Other(format!("Failed to read container state: {}", e)))?;

            let created_at = raw
                .get("Created")
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));

            Ok(ContainerDetails {
                id: inspect.id.unwrap_or_else(|| handle.id.clone()),
                name: inspect
                    .name
                    .map(|n| n.trim_start_matches('/').to_string())
                    .or_else(|| handle.name.clone())
                    .unwrap_or_default(),
                engine_status: raw
                    .pointer("/State/Status")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
                created_at,
                raw_state: raw
                    .get("State")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null),
            })
        })
    }
}

fn map_not_found(e: bollard::errors::Error, handle: &ContainerHandle) -> EngineError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => EngineError::NotFound(handle.id.clone()),
        e => EngineError::Api(e),
    }
}

/// Split an image reference into repository and tag, defaulting to `latest`.
///
/// Digest references are passed through whole with an empty tag.
fn split_image_tag(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }

    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}
