use std::collections::HashMap;

use anyhow::{Context, Result};
use bollard::models::{ContainerCreateBody, DeviceRequest, HostConfig, PortBinding};
use bollard::query_parameters::{
    CreateContainerOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::Docker;

use crate::config::model::RuntimeRequirements;

/// Everything needed to run one short-lived test container for
/// `TestImage`: the image under test, the port it serves on, the
/// host/container log directory pair to bind-mount, and any GPU
/// attachment its template requires.
pub struct RunSpec<'a> {
    pub name: &'a str,
    pub image: &'a str,
    pub container_port: u16,
    pub host_log_dir: &'a std::path::Path,
    pub container_log_dir: &'a std::path::Path,
    pub runtime_requirements: &'a RuntimeRequirements,
}

/// Create and start a detached container, publishing `container_port` to an
/// ephemeral host port, bind-mounting `host_log_dir` onto `container_log_dir`,
/// and attaching a GPU device request when the model's template calls for
/// one. Returns the container id and the host port it was published on.
pub async fn run_container(docker: &Docker, spec: &RunSpec<'_>) -> Result<(String, u16)> {
    let _ = remove_container(docker, spec.name, true).await;

    let container_port_key = format!("{}/tcp", spec.container_port);
    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::from([(
        container_port_key.clone(),
        Some(vec![PortBinding {
            host_ip: Some("0.0.0.0".to_string()),
            host_port: None,
        }]),
    )]);

    let device_requests = spec.runtime_requirements.runtime.as_ref().map(|_| {
        vec![DeviceRequest {
            driver: Some("nvidia".to_string()),
            count: Some(-1),
            device_ids: spec
                .runtime_requirements
                .gpu_device_index
                .map(|idx| vec![idx.to_string()]),
            capabilities: Some(vec![vec!["gpu".to_string()]]),
            ..Default::default()
        }]
    });

    std::fs::create_dir_all(spec.host_log_dir)
        .with_context(|| format!("creating host log directory {}", spec.host_log_dir.display()))?;
    let log_bind = format!(
        "{}:{}",
        spec.host_log_dir.display(),
        spec.container_log_dir.display()
    );

    let host_config = HostConfig {
        port_bindings: Some(port_bindings),
        binds: Some(vec![log_bind]),
        device_requests,
        ..Default::default()
    };

    let config = ContainerCreateBody {
        image: Some(spec.image.to_string()),
        exposed_ports: Some(HashMap::from([(container_port_key, HashMap::new())])),
        host_config: Some(host_config),
        ..Default::default()
    };

    let options = CreateContainerOptions {
        name: Some(spec.name.to_string()),
        ..Default::default()
    };

    let response = docker
        .create_container(Some(options), config)
        .await
        .with_context(|| format!("creating test container for {}", spec.name))?;

    docker
        .start_container(&response.id, None::<StartContainerOptions>)
        .await
        .with_context(|| format!("starting test container for {}", spec.name))?;

    let inspected = docker
        .inspect_container(&response.id, None)
        .await
        .with_context(|| format!("inspecting test container for {}", spec.name))?;

    let host_port = inspected
        .network_settings
        .and_then(|ns| ns.ports)
        .and_then(|ports| ports.get(&format!("{}/tcp", spec.container_port)).cloned())
        .flatten()
        .and_then(|bindings| bindings.into_iter().next())
        .and_then(|b| b.host_port)
        .and_then(|p| p.parse::<u16>().ok())
        .with_context(|| format!("container for {} published no host port", spec.name))?;

    Ok((response.id, host_port))
}

/// Stop a container by name or id, tolerating "already stopped" / "gone".
pub async fn stop_container(docker: &Docker, container_id: &str, timeout_secs: i32) -> Result<()> {
    let options = StopContainerOptions {
        t: Some(timeout_secs),
        signal: None,
    };
    match docker.stop_container(container_id, Some(options)).await {
        Ok(()) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 304 | 404,
            ..
        }) => Ok(()),
        Err(e) => Err(e).context("stopping container"),
    }
}

/// Remove a container by name or id, tolerating "already gone".
pub async fn remove_container(docker: &Docker, container_id: &str, force: bool) -> Result<()> {
    let options = RemoveContainerOptions {
        force,
        ..Default::default()
    };
    match docker.remove_container(container_id, Some(options)).await {
        Ok(()) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => Ok(()),
        Err(e) => Err(e).context("removing container"),
    }
}
