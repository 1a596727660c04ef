use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use bollard::auth::DockerCredentials;
use bollard::models::{BuildInfo, CreateImageInfo};
use bollard::query_parameters::{
    BuildImageOptions, CreateImageOptions, PushImageOptions, RemoveImageOptions, TagImageOptions,
};
use bollard::Docker;
use futures_util::StreamExt;

/// Parse an image reference into (name, tag): `"reg/ns/name:tag"` ->
/// `("reg/ns/name", "tag")`; a reference without a tag defaults to `latest`.
pub fn parse_image_ref(image: &str) -> (&str, &str) {
    match image.rsplit_once(':') {
        Some((name, tag)) if !name.is_empty() && !tag.is_empty() => (name, tag),
        _ => (image, "latest"),
    }
}

/// Check if an image exists locally.
pub async fn check_image_exists(docker: &Docker, image: &str) -> bool {
    docker.inspect_image(image).await.is_ok()
}

/// Remove a local image by reference. Missing images are not an error --
/// most runs start from a clean image.
pub async fn remove_image(docker: &Docker, image: &str) -> Result<()> {
    let options = RemoveImageOptions {
        force: true,
        ..Default::default()
    };
    match docker.remove_image(image, Some(options), None).await {
        Ok(_) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing image {image}")),
    }
}

/// Build an image from a build context directory containing a `Dockerfile`,
/// tagging the result `image_tag`. The context is archived into an
/// in-memory tar stream, since a tar body is the only way to ship a build
/// context over the Docker API.
pub async fn build_image(
    docker: &Docker,
    build_context_path: &Path,
    image_tag: &str,
    build_args: &BTreeMap<String, String>,
) -> Result<()> {
    let tar_bytes = tar_build_context(build_context_path)
        .with_context(|| format!("archiving build context {}", build_context_path.display()))?;

    let buildargs = encode_build_args(build_args).context("encoding build args")?;

    let options = BuildImageOptions {
        dockerfile: "Dockerfile".to_string(),
        t: Some(image_tag.to_string()),
        rm: true,
        buildargs,
        ..Default::default()
    };

    let mut stream = docker.build_image(options, None, Some(tar_bytes.into()));
    while let Some(result) = stream.next().await {
        let info: BuildInfo = result.with_context(|| format!("building image {image_tag}"))?;
        if let Some(err) = info.error {
            bail!("image build failed for {image_tag}: {err}");
        }
    }

    Ok(())
}

/// Encode `buildArgs` as the JSON object string the Docker Engine API's
/// `buildargs` build-query parameter expects. `None` when there are no
/// build args, so the query string omits the parameter entirely rather
/// than sending `"{}"`.
fn encode_build_args(build_args: &BTreeMap<String, String>) -> Result<Option<String>, serde_json::Error> {
    if build_args.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(build_args).map(Some)
}

fn tar_build_context(path: &Path) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_dir_all(".", path)
        .with_context(|| format!("packing {}", path.display()))?;
    builder.into_inner().context("finalizing build context archive")
}

/// Tag an existing image under a new reference, e.g. retagging for
/// Docker Hub.
pub async fn tag_image(docker: &Docker, source: &str, target: &str) -> Result<()> {
    let (repo, tag) = parse_image_ref(target);
    let options = TagImageOptions {
        repo: Some(repo.to_string()),
        tag: Some(tag.to_string()),
    };
    docker
        .tag_image(source, Some(options))
        .await
        .with_context(|| format!("tagging {source} as {target}"))
}

/// Push a previously built/tagged image to a registry, optionally
/// authenticating.
pub async fn push_image(
    docker: &Docker,
    image: &str,
    credentials: Option<DockerCredentials>,
) -> Result<()> {
    let (name, tag) = parse_image_ref(image);
    let options = PushImageOptions {
        tag: Some(tag.to_string()),
    };

    let mut stream = docker.push_image(name, Some(options), credentials);
    while let Some(result) = stream.next().await {
        let info = result.with_context(|| format!("pushing image {image}"))?;
        if let Some(err) = info.error_detail.and_then(|d| d.message) {
            bail!("image push failed for {image}: {err}");
        }
    }

    Ok(())
}

/// Pull a single image, optionally authenticating against a private
/// registry.
pub async fn pull_image(
    docker: &Docker,
    image: &str,
    credentials: Option<DockerCredentials>,
) -> Result<()> {
    let (name, tag) = parse_image_ref(image);
    let options = CreateImageOptions {
        from_image: Some(name.to_string()),
        tag: Some(tag.to_string()),
        ..Default::default()
    };

    let mut stream = docker.create_image(Some(options), None, credentials);
    while let Some(result) = stream.next().await {
        let info: CreateImageInfo = result.with_context(|| format!("pulling image {image}"))?;
        if let Some(err) = &info.error {
            bail!("image pull failed for {image}: {err}");
        }
    }

    Ok(())
}

/// Build Docker Hub login credentials from a configured username/password.
pub fn dockerhub_credentials(username: &str, password: &str) -> DockerCredentials {
    DockerCredentials {
        username: Some(username.to_string()),
        password: Some(password.to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_image_with_tag() {
        assert_eq!(parse_image_ref("reg.example.com/ns/model:latest"), ("reg.example.com/ns/model", "latest"));
    }

    #[test]
    fn parse_image_without_tag() {
        assert_eq!(parse_image_ref("model"), ("model", "latest"));
    }

    #[test]
    fn parse_image_with_port_in_registry_host() {
        assert_eq!(
            parse_image_ref("localhost:5000/model:v1"),
            ("localhost:5000/model", "v1")
        );
    }

    #[test]
    fn encode_build_args_omits_parameter_when_empty() {
        assert_eq!(encode_build_args(&BTreeMap::new()).unwrap(), None);
    }

    #[test]
    fn encode_build_args_json_encodes_the_map() {
        let mut args = BTreeMap::new();
        args.insert("MODEL_VERSION".to_string(), "3".to_string());
        let encoded = encode_build_args(&args).unwrap().unwrap();
        assert_eq!(encoded, r#"{"MODEL_VERSION":"3"}"#);
    }
}
