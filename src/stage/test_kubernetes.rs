use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::config::model::ModelDescriptor;
use crate::poll::poll;
use crate::stage::{ActOutput, DeploymentItem, LogRecord, Stage, StageKind};

/// Probes a model's deployed Service over HTTP until it answers `200` or
/// the model's deployment polling timeout elapses. Unlike `TestImageStage`
/// there is no container to run or port to rebind -- the probe URL already
/// targets the cluster-internal Service address.
pub struct TestKubernetesStage {
    pub http: reqwest::Client,
    pub models: BTreeMap<String, ModelDescriptor>,
}

#[async_trait]
impl Stage for TestKubernetesStage {
    fn kind(&self) -> StageKind {
        StageKind::TestKubernetes
    }

    async fn act(&self, mut item: DeploymentItem) -> Result<ActOutput> {
        let descriptor = self
            .models
            .get(&item.model_name)
            .with_context(|| format!("no descriptor for model '{}'", item.model_name))?;

        let payload: serde_json::Map<String, Value> = descriptor
            .model_args
            .iter()
            .map(|arg| (arg.clone(), Value::Array(vec![Value::String("This is probe text.".to_string())])))
            .collect();

        let client = self.http.clone();
        let url = descriptor.deployment_probe_url.clone();
        let timeout = Duration::from_secs_f64(descriptor.deployment_probe_timeout_sec);

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
        .map_err(|e| anyhow::anyhow!("probing {} timed out: {e}", descriptor.deployment_probe_url))?;

        let body: Value = response.json().await.context("parsing probe response body")?;

        let extended = format!("elapsed time: {elapsed:?}, model response: {body}");
        item.extended_info = Some(extended.clone());

        let log = LogRecord::info(
            &item.model_name,
            format!("[{}] [test kuber deployment]: stage finished", item.model_name),
        )
        .with_extended(extended);
        Ok(ActOutput::new(item).with_log(log))
    }
}
