#![allow(dead_code)]
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cluster_deployer::stage::{ActOutput, DeploymentItem, LogRecord, Stage, StageKind};

/// Records every `(model_name, stage)` pair it sees, in the order `act` was
/// invoked, and otherwise passes the item through unchanged. Shared across
/// every fake stage in one batch so a test can assert the exact visit
/// sequence each model took through its pipeline.
#[derive(Clone, Default)]
pub struct VisitLog(pub Arc<Mutex<Vec<(String, StageKind)>>>);

impl VisitLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visits_for(&self, model: &str) -> Vec<StageKind> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == model)
            .map(|(_, s)| *s)
            .collect()
    }
}

/// A fake stage that records its visit and always succeeds.
pub struct RecordingStage {
    pub kind: StageKind,
    pub log: VisitLog,
}

#[async_trait]
impl Stage for RecordingStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    async fn act(&self, item: DeploymentItem) -> anyhow::Result<ActOutput> {
        self.log.0.lock().unwrap().push((item.model_name.clone(), self.kind));
        Ok(ActOutput::new(item))
    }
}

/// A fake stage that records its visit and then fails every item it sees,
/// simulating an external-system error.
pub struct FailingRecordingStage {
    pub kind: StageKind,
    pub log: VisitLog,
}

#[async_trait]
impl Stage for FailingRecordingStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    async fn act(&self, item: DeploymentItem) -> anyhow::Result<ActOutput> {
        self.log.0.lock().unwrap().push((item.model_name.clone(), self.kind));
        anyhow::bail!("synthetic external-system failure in {:?}", self.kind)
    }
}

/// The terminal stage, recording its visit like every other fake stage.
pub struct RecordingFinish {
    pub log: VisitLog,
}

#[async_trait]
impl Stage for RecordingFinish {
    fn kind(&self) -> StageKind {
        StageKind::Finish
    }

    async fn act(&self, mut item: DeploymentItem) -> anyhow::Result<ActOutput> {
        self.log.0.lock().unwrap().push((item.model_name.clone(), StageKind::Finish));
        item.finished = true;
        Ok(ActOutput::new(item).with_log(LogRecord::info(&item.model_name, "DEPLOYMENT FINISHED")))
    }
}
