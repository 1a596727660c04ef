use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::model::ModelDescriptor;
use crate::kube_client::KubeClient;
use crate::stage::{ActOutput, DeploymentItem, LogRecord, Stage, StageKind};

const DEFAULT_NAMESPACE: &str = "default";

/// Tears down a model's Deployment and Service. A manifest that was never
/// materialized is skipped rather than treated as an error, and an object
/// that no longer exists in the cluster is noted, not retried.
pub struct DeleteKubernetesStage {
    pub client: KubeClient,
    pub models: BTreeMap<String, ModelDescriptor>,
}

#[async_trait]
impl Stage for DeleteKubernetesStage {
    fn kind(&self) -> StageKind {
        StageKind::DeleteKubernetes
    }

    async fn act(&self, mut item: DeploymentItem) -> Result<ActOutput> {
        let descriptor = self
            .models
            .get(&item.model_name)
            .with_context(|| format!("no descriptor for model '{}'", item.model_name))?;

        let mut notes = Vec::new();

        if descriptor.kube_deployment_file.is_file() {
            let namespace = manifest_namespace(&descriptor.kube_deployment_file)?;
            if self
                .client
                .deployment_exists(&namespace, &descriptor.kube_deployment_name)
                .await?
            {
                self.client
                    .delete_deployment(&namespace, &descriptor.kube_deployment_name)
                    .await?;
                notes.push(format!(
                    "deleted Deployment {} in {namespace}",
                    descriptor.kube_deployment_name
                ));
            } else {
                notes.push(format!(
                    "Deployment {} not present in {namespace}",
                    descriptor.kube_deployment_name
                ));
            }
        }

        if descriptor.kube_service_file.is_file() {
            let namespace = manifest_namespace(&descriptor.kube_service_file)?;
            if self
                .client
                .service_exists(&namespace, &descriptor.kube_service_name)
                .await?
            {
                self.client
                    .delete_service(&namespace, &descriptor.kube_service_name)
                    .await?;
                notes.push(format!(
                    "deleted Service {} in {namespace}",
                    descriptor.kube_service_name
                ));
            } else {
                notes.push(format!(
                    "Service {} not present in {namespace}",
                    descriptor.kube_service_name
                ));
            }
        }

        if notes.is_empty() {
            notes.push("no manifests present to delete".to_string());
        }

        let extended = notes.join("; ");
        item.extended_info = Some(extended.clone());

        let log = LogRecord::info(
            &item.model_name,
            format!(
                "[{}] [delete kubernetes deployment]: stage finished",
                item.model_name
            ),
        )
        .with_extended(extended);
        Ok(ActOutput::new(item).with_log(log))
    }
}

/// The manifest's own `metadata.namespace`, defaulting to `"default"`,
/// without constructing a typed `Deployment`/`Service` -- deleting only
/// needs the namespace and name, not the rest of the spec.
fn manifest_namespace(path: &std::path::Path) -> Result<String> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let doc: serde_yaml::Value = serde_yaml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    let namespace = doc
        .get("metadata")
        .and_then(|m| m.get("namespace"))
        .and_then(|n| n.as_str())
        .unwrap_or(DEFAULT_NAMESPACE)
        .to_string();
    Ok(namespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_namespace_defaults_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dp.yaml");
        std::fs::write(&path, "metadata:\n  name: stand-ner-ru-dp\n").unwrap();
        assert_eq!(manifest_namespace(&path).unwrap(), "default");
    }

    #[test]
    fn manifest_namespace_keeps_explicit_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dp.yaml");
        std::fs::write(&path, "metadata:\n  name: stand-ner-ru-dp\n  namespace: models\n").unwrap();
        assert_eq!(manifest_namespace(&path).unwrap(), "models");
    }
}
