use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::model::ModelDescriptor;
use crate::kube_client::{self, KubeClient};
use crate::stage::{ActOutput, DeploymentItem, LogRecord, Stage, StageKind};

/// Creates a model's Deployment and (if present) Service objects from its
/// materialized manifests. A missing manifest (a model with no
/// LoadBalancer never gets a `kuber_lb.yaml`) is skipped silently rather
/// than treated as an error.
pub struct DeployKubernetesStage {
    pub client: KubeClient,
    pub models: BTreeMap<String, ModelDescriptor>,
}

#[async_trait]
impl Stage for DeployKubernetesStage {
    fn kind(&self) -> StageKind {
        StageKind::DeployKubernetes
    }

    async fn act(&self, mut item: DeploymentItem) -> Result<ActOutput> {
        let descriptor = self
            .models
            .get(&item.model_name)
            .with_context(|| format!("no descriptor for model '{}'", item.model_name))?;

        let mut notes = Vec::new();

        if descriptor.kube_deployment_file.is_file() {
            let content = std::fs::read_to_string(&descriptor.kube_deployment_file)
                .with_context(|| format!("reading {}", descriptor.kube_deployment_file.display()))?;
            let (deployment, namespace) = kube_client::parse_deployment(&content)?;
            self.client.create_deployment(&namespace, deployment).await?;
            notes.push(format!(
                "created Deployment {} in {namespace}",
                descriptor.kube_deployment_name
            ));
        }

        if descriptor.kube_service_file.is_file() {
            let content = std::fs::read_to_string(&descriptor.kube_service_file)
                .with_context(|| format!("reading {}", descriptor.kube_service_file.display()))?;
            let (service, namespace) = kube_client::parse_service(&content)?;
            self.client.create_service(&namespace, service).await?;
            notes.push(format!(
                "created Service {} in {namespace}",
                descriptor.kube_service_name
            ));
        }

        if notes.is_empty() {
            notes.push("no manifests present to deploy".to_string());
        }

        let extended = notes.join("; ");
        item.extended_info = Some(extended.clone());

        let log = LogRecord::info(
            &item.model_name,
            format!("[{}] [deploy in kubernetes]: stage finished", item.model_name),
        )
        .with_extended(extended);
        Ok(ActOutput::new(item).with_log(log))
    }
}
