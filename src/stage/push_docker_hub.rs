use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bollard::Docker;

use crate::config::model::ModelDescriptor;
use crate::docker::image;
use crate::stage::{ActOutput, DeploymentItem, LogRecord, Stage, StageKind};

/// Retags a model's image under the Docker Hub registry and pushes it,
/// removing the retagged reference afterward. Login credentials are
/// resolved once per batch by the caller and passed in already built.
pub struct PushDockerHubStage {
    pub docker: Docker,
    pub dockerhub_registry: String,
    pub credentials: Option<bollard::auth::DockerCredentials>,
    pub models: BTreeMap<String, ModelDescriptor>,
}

#[async_trait]
impl Stage for PushDockerHubStage {
    fn kind(&self) -> StageKind {
        StageKind::PushToDockerHub
    }

    async fn act(&self, mut item: DeploymentItem) -> Result<ActOutput> {
        let descriptor = self
            .models
            .get(&item.model_name)
            .with_context(|| format!("no descriptor for model '{}'", item.model_name))?;

        if self.dockerhub_registry.is_empty() {
            bail!("dockerhub_registry is not configured");
        }

        let dockerhub_tag = format!("{}/{}", self.dockerhub_registry, descriptor.model_name);

        image::tag_image(&self.docker, &descriptor.image_tag, &dockerhub_tag).await?;
        let push_result = image::push_image(&self.docker, &dockerhub_tag, self.credentials.clone()).await;
        image::remove_image(&self.docker, &dockerhub_tag).await.ok();
        push_result?;

        let extended = format!("pushed {dockerhub_tag}");
        item.extended_info = Some(extended.clone());

        let log = LogRecord::info(
            &item.model_name,
            format!("[{}] [push to docker hub]: stage finished", item.model_name),
        )
        .with_extended(extended);
        Ok(ActOutput::new(item).with_log(log))
    }
}
