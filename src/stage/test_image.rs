use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::Docker;
use serde_json::Value;

use crate::config::model::ModelDescriptor;
use crate::docker::container::{self, RunSpec};
use crate::poll::poll;
use crate::stage::{ActOutput, DeploymentItem, LogRecord, Stage, StageKind};

/// Runs a model's just-built image in an ephemeral container and probes its
/// API over HTTP until it answers `200` or the model's image polling
/// timeout elapses. GPU device attachment is conditional on the model's
/// `runtime_requirements`.
pub struct TestImageStage {
    pub docker: Docker,
    pub http: reqwest::Client,
    pub models: BTreeMap<String, ModelDescriptor>,
    pub host_log_dir: std::path::PathBuf,
    pub container_log_dir: std::path::PathBuf,
}

#[async_trait]
impl Stage for TestImageStage {
    fn kind(&self) -> StageKind {
        StageKind::TestImage
    }

    async fn act(&self, mut item: DeploymentItem) -> Result<ActOutput> {
        let descriptor = self
            .models
            .get(&item.model_name)
            .with_context(|| format!("no descriptor for model '{}'", item.model_name))?;

        let container_name = format!("{}-test", descriptor.dashed_name);
        let host_log_dir = self.host_log_dir.join(&descriptor.full_name);
        let spec = RunSpec {
            name: &container_name,
            image: &descriptor.image_tag,
            container_port: descriptor.container_port,
            host_log_dir: &host_log_dir,
            container_log_dir: &self.container_log_dir,
            runtime_requirements: &descriptor.runtime_requirements,
        };

        let (container_id, host_port) = container::run_container(&self.docker, &spec).await?;

        let probe_result = self.probe(descriptor, host_port).await;

        container::stop_container(&self.docker, &container_id, 10).await.ok();
        container::remove_container(&self.docker, &container_id, true).await.ok();

        let (response, elapsed) = probe_result?;

        let extended = format!("elapsed time: {elapsed:?}, model response: {response}");
        item.extended_info = Some(extended.clone());

        let log = LogRecord::info(
            &item.model_name,
            format!("[{}] [test docker image]: stage finished", item.model_name),
        )
        .with_extended(extended);
        Ok(ActOutput::new(item).with_log(log))
    }
}

impl TestImageStage {
    async fn probe(&self, descriptor: &ModelDescriptor, host_port: u16) -> Result<(Value, Duration)> {
        let url = rebind_probe_port(&descriptor.image_probe_url, host_port);
        let payload: serde_json::Map<String, Value> = descriptor
            .model_args
            .iter()
            .map(|arg| (arg.clone(), Value::Array(vec![Value::String("This is probe text.".to_string())])))
            .collect();

        let client = self.http.clone();
        let timeout = Duration::from_secs_f64(descriptor.image_probe_timeout_sec);

        let (response, elapsed) = poll(
            || {
                let client = client.clone();
                let url = url.clone();
                let payload = Value::Object(payload.clone());
                async move { client.post(&url).json(&payload).send().await }
            },
            |resp: &reqwest::Response| resp.status().is_success(),
            Duration::from_secs(1),
            timeout,
        )
        .await
        .map_err(|e| anyhow::anyhow!("probing {} timed out: {e}", descriptor.image_probe_url))?;

        let body: Value = response.json().await.context("parsing probe response body")?;
        Ok((body, elapsed))
    }
}

/// The descriptor's probe URL targets the container's own port; once
/// published to an ephemeral host port, redirect the probe there.
fn rebind_probe_port(url: &str, host_port: u16) -> String {
    match reqwest::Url::parse(url) {
        Ok(mut parsed) => {
            let _ = parsed.set_port(Some(host_port));
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebind_probe_port_replaces_port_keeping_path() {
        let rebound = rebind_probe_port("http://localhost:8000/probe", 54321);
        assert_eq!(rebound, "http://localhost:54321/probe");
    }
}
