use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::Docker;

use crate::config::model::ModelDescriptor;
use crate::docker::image;
use crate::stage::{ActOutput, DeploymentItem, LogRecord, Stage, StageKind};

/// Builds a model's image from its materialized build context, passing the
/// descriptor's build args straight through to the Docker Engine API.
pub struct BuildImageStage {
    pub docker: Docker,
    pub models: std::collections::BTreeMap<String, ModelDescriptor>,
}

#[async_trait]
impl Stage for BuildImageStage {
    fn kind(&self) -> StageKind {
        StageKind::BuildImage
    }

    async fn act(&self, mut item: DeploymentItem) -> Result<ActOutput> {
        let descriptor = self
            .models
            .get(&item.model_name)
            .with_context(|| format!("no descriptor for model '{}'", item.model_name))?;

        image::build_image(
            &self.docker,
            &descriptor.build_context_path,
            &descriptor.image_tag,
            &descriptor.build_args,
        )
        .await?;

        let extended = format!("built {}", descriptor.image_tag);
        item.extended_info = Some(extended.clone());

        let log = LogRecord::info(
            &item.model_name,
            format!(
                "[{}] [build docker image]: stage finished",
                item.model_name
            ),
        )
        .with_extended(extended);
        Ok(ActOutput::new(item).with_log(log))
    }
}
