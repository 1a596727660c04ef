pub mod container;
pub mod image;

use anyhow::{Context, Result};
use bollard::Docker;

const CLIENT_TIMEOUT_SECS: u64 = 120;

/// Connect to the Docker daemon at `config.yaml`'s `docker_base_url` and
/// verify it answers a ping before any stage touches it. Accepts the same
/// `unix://`, `http://`/`tcp://` schemes bollard's own constructors expect;
/// anything else falls back to the environment-derived defaults
/// (`DOCKER_HOST`, or the local socket).
pub async fn connect(base_url: &str) -> Result<Docker> {
    let docker = if let Some(path) = base_url.strip_prefix("unix://") {
        Docker::connect_with_unix(path, CLIENT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
    } else if base_url.starts_with("http://") || base_url.starts_with("tcp://") {
        Docker::connect_with_http(base_url, CLIENT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
    } else {
        Docker::connect_with_local_defaults()
    }
    .with_context(|| format!("connecting to Docker daemon ({base_url})"))?;

    docker
        .ping()
        .await
        .context("Docker daemon did not respond to ping. Is it running?")?;
    Ok(docker)
}
