use anyhow::Result;
use async_trait::async_trait;

use crate::stage::{ActOutput, DeploymentItem, LogRecord, Stage, StageKind};

/// Terminal stage of every pipeline, appended by
/// `Pipeline::stages_with_terminal` if the catalog entry omits it. Sets
/// `finished` and emits the "DEPLOYMENT FINISHED" record.
pub struct FinishStage;

#[async_trait]
impl Stage for FinishStage {
    fn kind(&self) -> StageKind {
        StageKind::Finish
    }

    async fn act(&self, mut item: DeploymentItem) -> Result<ActOutput> {
        item.finished = true;
        let log = LogRecord::info(&item.model_name, "DEPLOYMENT FINISHED");
        Ok(ActOutput::new(item).with_log(log))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn marks_item_finished_and_logs() {
        let stage = FinishStage;
        let item = DeploymentItem::new("stand_ner_ru", vec![]);
        let output = stage.act(item).await.unwrap();

        assert!(output.item.finished);
        assert_eq!(output.logs.len(), 1);
        assert_eq!(output.logs[0].message, "DEPLOYMENT FINISHED");
    }
}
