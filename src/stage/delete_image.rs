use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::Docker;

use crate::config::model::ModelDescriptor;
use crate::docker::image;
use crate::stage::{ActOutput, DeploymentItem, LogRecord, Stage, StageKind};

/// Removes a model's previously built image, if any. A missing image is
/// not an error -- most runs start from a clean slate.
pub struct DeleteImageStage {
    pub docker: Docker,
    pub models: std::collections::BTreeMap<String, ModelDescriptor>,
}

#[async_trait]
impl Stage for DeleteImageStage {
    fn kind(&self) -> StageKind {
        StageKind::DeleteImage
    }

    async fn act(&self, mut item: DeploymentItem) -> Result<ActOutput> {
        let descriptor = self
            .models
            .get(&item.model_name)
            .with_context(|| format!("no descriptor for model '{}'", item.model_name))?;

        let existed = image::check_image_exists(&self.docker, &descriptor.image_tag).await;
        image::remove_image(&self.docker, &descriptor.image_tag).await?;

        let extended = if existed {
            format!("removed image {}", descriptor.image_tag)
        } else {
            format!("image not present: {}", descriptor.image_tag)
        };
        item.extended_info = Some(extended.clone());

        let log = LogRecord::info(
            &item.model_name,
            format!("[{}] [delete docker image]: stage finished", item.model_name),
        )
        .with_extended(extended);
        Ok(ActOutput::new(item).with_log(log))
    }
}
