use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::Docker;

use crate::config::model::ModelDescriptor;
use crate::docker::image;
use crate::stage::{ActOutput, DeploymentItem, LogRecord, Stage, StageKind};

/// Pushes a model's built image to the configured cluster registry.
pub struct PushImageStage {
    pub docker: Docker,
    pub models: BTreeMap<String, ModelDescriptor>,
}

#[async_trait]
impl Stage for PushImageStage {
    fn kind(&self) -> StageKind {
        StageKind::PushImage
    }

    async fn act(&self, mut item: DeploymentItem) -> Result<ActOutput> {
        let descriptor = self
            .models
            .get(&item.model_name)
            .with_context(|| format!("no descriptor for model '{}'", item.model_name))?;

        image::push_image(&self.docker, &descriptor.image_tag, None).await?;

        let extended = format!("pushed {}", descriptor.image_tag);
        item.extended_info = Some(extended.clone());

        let log = LogRecord::info(
            &item.model_name,
            format!("[{}] [push to cluster repo]: stage finished", item.model_name),
        )
        .with_extended(extended);
        Ok(ActOutput::new(item).with_log(log))
    }
}

/// Pulls a model's image from the configured cluster registry.
pub struct PullImageStage {
    pub docker: Docker,
    pub models: BTreeMap<String, ModelDescriptor>,
}

#[async_trait]
impl Stage for PullImageStage {
    fn kind(&self) -> StageKind {
        StageKind::PullImage
    }

    async fn act(&self, mut item: DeploymentItem) -> Result<ActOutput> {
        let descriptor = self
            .models
            .get(&item.model_name)
            .with_context(|| format!("no descriptor for model '{}'", item.model_name))?;

        image::pull_image(&self.docker, &descriptor.image_tag, None).await?;

        let extended = format!("pulled {}", descriptor.image_tag);
        item.extended_info = Some(extended.clone());

        let log = LogRecord::info(
            &item.model_name,
            format!("[{}] [pull from cluster repo]: stage finished", item.model_name),
        )
        .with_extended(extended);
        Ok(ActOutput::new(item).with_log(log))
    }
}
