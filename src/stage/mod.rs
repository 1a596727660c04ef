pub mod build_image;
pub mod delete_image;
pub mod delete_kubernetes;
pub mod deploy_kubernetes;
pub mod finish;
pub mod make_files;
pub mod push_docker_hub;
pub mod push_pull_image;
pub mod test_image;
pub mod test_kubernetes;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One of the ten concrete stage kinds, plus the terminal marker. A tagged
/// variant over the concrete stage implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StageKind {
    MakeFiles,
    DeleteImage,
    BuildImage,
    TestImage,
    PushImage,
    PullImage,
    PushToDockerHub,
    DeployKubernetes,
    DeleteKubernetes,
    TestKubernetes,
    Finish,
}

impl StageKind {
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::MakeFiles => "make deployment files",
            StageKind::DeleteImage => "delete docker image",
            StageKind::BuildImage => "build docker image",
            StageKind::TestImage => "test docker image",
            StageKind::PushImage => "push to cluster repo",
            StageKind::PullImage => "pull from cluster repo",
            StageKind::PushToDockerHub => "push to docker hub",
            StageKind::DeployKubernetes => "deploy in kubernetes",
            StageKind::DeleteKubernetes => "delete kubernetes deployment",
            StageKind::TestKubernetes => "test kuber deployment",
            StageKind::Finish => "finish",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Produced by any stage or the engine; consumed only by the logging fabric.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub model_name: String,
    pub level: LogLevel,
    pub message: String,
    pub extended: Option<String>,
}

impl LogRecord {
    pub fn info(model_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            level: LogLevel::Info,
            message: message.into(),
            extended: None,
        }
    }

    pub fn error(model_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            level: LogLevel::Error,
            message: message.into(),
            extended: None,
        }
    }

    pub fn with_extended(mut self, extended: impl Into<String>) -> Self {
        self.extended = Some(extended.into());
        self
    }
}

/// The unit flowing through the pipeline. Mutated only by the engine
/// (`remaining_stages`) and by the stage currently holding it (`finished`,
/// `extended_info`).
#[derive(Debug, Clone)]
pub struct DeploymentItem {
    pub model_name: String,
    pub remaining_stages: Vec<StageKind>,
    pub finished: bool,
    pub extended_info: Option<String>,
}

impl DeploymentItem {
    pub fn new(model_name: impl Into<String>, pipeline: Vec<StageKind>) -> Self {
        Self {
            model_name: model_name.into(),
            remaining_stages: pipeline,
            finished: false,
            extended_info: None,
        }
    }
}

/// Output of a single `act` invocation: the (possibly mutated) item, plus
/// zero or more log records to route ahead of the item.
pub struct ActOutput {
    pub item: DeploymentItem,
    pub logs: Vec<LogRecord>,
}

impl ActOutput {
    pub fn new(item: DeploymentItem) -> Self {
        Self { item, logs: Vec::new() }
    }

    pub fn with_log(mut self, log: LogRecord) -> Self {
        self.logs.push(log);
        self
    }
}

/// Every stage implements this single side-effecting action. The error
/// boundary wrapping every call lives in `run_stage_boundary`, not in
/// implementations -- `act` may return any error and the boundary will
/// catch it.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    async fn act(&self, item: DeploymentItem) -> anyhow::Result<ActOutput>;

    /// Best-effort cleanup of any transient resource (e.g. a running test
    /// container) this stage may have opened for `model_name`. Called by
    /// the error boundary when `act` fails. Default no-op; stages that open
    /// containers override it.
    async fn cleanup_on_error(&self, _model_name: &str) {}
}

/// Wraps a stage's `act` with its error boundary: any error raised by `act`
/// is caught here; the item is marked `finished = true`, an ERROR LogRecord
/// with the formatted cause chain is emitted, the stage's best-effort
/// cleanup runs, and the item is returned. Stages never crash the process.
pub async fn run_stage_boundary(stage: &dyn Stage, item: DeploymentItem) -> ActOutput {
    let model_name = item.model_name.clone();
    let stage_name = stage.kind().name();

    match stage.act(item).await {
        Ok(output) => output,
        Err(err) => {
            stage.cleanup_on_error(&model_name).await;

            let mut failed = DeploymentItem {
                model_name: model_name.clone(),
                remaining_stages: Vec::new(),
                finished: true,
                extended_info: None,
            };
            failed.finished = true;

            let message = format!("[{model_name}] [{stage_name}]: error occurred during stage");
            let log = LogRecord::error(model_name, message).with_extended(format!("{err:#}"));

            ActOutput {
                item: failed,
                logs: vec![log],
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FailingStage;

    #[async_trait]
    impl Stage for FailingStage {
        fn kind(&self) -> StageKind {
            StageKind::BuildImage
        }

        async fn act(&self, _item: DeploymentItem) -> anyhow::Result<ActOutput> {
            anyhow::bail!("docker daemon unreachable")
        }
    }

    struct SucceedingStage;

    #[async_trait]
    impl Stage for SucceedingStage {
        fn kind(&self) -> StageKind {
            StageKind::Finish
        }

        async fn act(&self, mut item: DeploymentItem) -> anyhow::Result<ActOutput> {
            item.finished = true;
            Ok(ActOutput::new(item))
        }
    }

    #[tokio::test]
    async fn error_boundary_marks_item_finished_and_emits_error_log() {
        let stage = FailingStage;
        let item = DeploymentItem::new("model_a", vec![StageKind::BuildImage, StageKind::Finish]);
        let output = run_stage_boundary(&stage, item).await;

        assert!(output.item.finished);
        assert_eq!(output.logs.len(), 1);
        assert_eq!(output.logs[0].level, LogLevel::Error);
        assert!(output.logs[0].extended.as_ref().unwrap().contains("docker daemon unreachable"));
    }

    #[tokio::test]
    async fn error_boundary_passes_through_success_unchanged() {
        let stage = SucceedingStage;
        let item = DeploymentItem::new("model_a", vec![]);
        let output = run_stage_boundary(&stage, item).await;

        assert!(output.item.finished);
        assert!(output.logs.is_empty());
    }
}
