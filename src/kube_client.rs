use anyhow::{Context, Result};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, PostParams, PropagationPolicy};
use kube::Client;

const DEFAULT_NAMESPACE: &str = "default";

/// Thin typed wrapper over the Kubernetes API: one `kube::Client`, typed
/// `Api<Deployment>` / `Api<Service>` handles scoped per call, no
/// generic/dynamic object plumbing.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    /// Build a client from the ambient kubeconfig (in-cluster config when
    /// running inside a pod, `~/.kube/config` otherwise).
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("building Kubernetes client from ambient kubeconfig")?;
        Ok(Self { client })
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub async fn deployment_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        match self.deployments(namespace).get_opt(name).await {
            Ok(found) => Ok(found.is_some()),
            Err(e) => Err(e).with_context(|| format!("checking for Deployment {name} in {namespace}")),
        }
    }

    pub async fn service_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        match self.services(namespace).get_opt(name).await {
            Ok(found) => Ok(found.is_some()),
            Err(e) => Err(e).with_context(|| format!("checking for Service {name} in {namespace}")),
        }
    }

    pub async fn create_deployment(&self, namespace: &str, deployment: Deployment) -> Result<()> {
        self.deployments(namespace)
            .create(&PostParams::default(), &deployment)
            .await
            .with_context(|| format!("creating Deployment in namespace {namespace}"))?;
        Ok(())
    }

    pub async fn create_service(&self, namespace: &str, service: Service) -> Result<()> {
        self.services(namespace)
            .create(&PostParams::default(), &service)
            .await
            .with_context(|| format!("creating Service in namespace {namespace}"))?;
        Ok(())
    }

    /// Delete a Deployment with background cascade propagation, matching the
    /// original tool's `V1DeleteOptions(propagation_policy='Background')`.
    pub async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        self.deployments(namespace)
            .delete(name, &params)
            .await
            .with_context(|| format!("deleting Deployment {name} in {namespace}"))?;
        Ok(())
    }

    pub async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        self.services(namespace)
            .delete(name, &params)
            .await
            .with_context(|| format!("deleting Service {name} in {namespace}"))?;
        Ok(())
    }
}

/// Parse a Deployment manifest document, defaulting its namespace to
/// `"default"` when the document omits `metadata.namespace`.
pub fn parse_deployment(yaml: &str) -> Result<(Deployment, String)> {
    let mut deployment: Deployment = serde_yaml::from_str(yaml).context("parsing Deployment manifest")?;
    let namespace = deployment
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    deployment.metadata.namespace = Some(namespace.clone());
    Ok((deployment, namespace))
}

/// Parse a Service manifest document, same namespace-default rule.
pub fn parse_service(yaml: &str) -> Result<(Service, String)> {
    let mut service: Service = serde_yaml::from_str(yaml).context("parsing Service manifest")?;
    let namespace = service
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    service.metadata.namespace = Some(namespace.clone());
    Ok((service, namespace))
}
