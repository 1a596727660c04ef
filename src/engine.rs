use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use futures_util::stream::{select_all, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::task::TaskTracker;

use crate::stage::{run_stage_boundary, DeploymentItem, LogRecord, Stage, StageKind};

/// What a stage worker's output queue carries back to the engine: either
/// the log records an `act` emitted, or the (possibly mutated)
/// `DeploymentItem` itself, ready for the next routing decision.
enum EngineEvent {
    Logs(Vec<LogRecord>),
    Item(DeploymentItem),
}

/// The single coordinator that owns every `DeploymentItem` and every queue.
/// One worker task runs per stage identifier referenced by the batch; the
/// engine never touches a stage's side-effecting clients directly, only
/// the `DeploymentItem`s and `LogRecord`s flowing through their queues.
pub struct Engine {
    stages: BTreeMap<StageKind, Arc<dyn Stage>>,
    temp_dir: PathBuf,
}

impl Engine {
    pub fn new(stages: BTreeMap<StageKind, Arc<dyn Stage>>, temp_dir: PathBuf) -> Self {
        Self { stages, temp_dir }
    }

    /// Drive one batch -- a model name paired with its full pipeline --
    /// to completion. Spawns a worker per referenced stage, primes every
    /// item into its first stage via the same `route` used for ongoing
    /// hand-off, then multiplexes stage outputs non-blockingly until the
    /// outstanding set empties, and finally cleans the temp directory.
    ///
    /// Both the in-queue each worker reads and the out-queue it reports
    /// through are unbounded, matching the original's `multiprocessing.Queue`
    /// (`maxsize=0`): the engine is the sole consumer of every out-queue and
    /// the sole producer into every in-queue, so a bounded channel would let
    /// a full queue block the one coordinator that is also responsible for
    /// draining the other side, deadlocking the whole batch.
    pub async fn run(&self, batch: Vec<(String, Vec<StageKind>)>, log_tx: mpsc::Sender<LogRecord>) -> Result<()> {
        let tracker = TaskTracker::new();
        let mut in_txs: BTreeMap<StageKind, mpsc::UnboundedSender<DeploymentItem>> = BTreeMap::new();
        let mut out_streams = Vec::new();

        let referenced: BTreeSet<StageKind> = batch.iter().flat_map(|(_, pipeline)| pipeline.iter().copied()).collect();

        for kind in &referenced {
            // A stage the batch references may have no worker available --
            // PushToDockerHub with no configured credentials, for example.
            // Items that reach it retire via `route`'s missing-worker arm.
            let Some(stage) = self.stages.get(kind).cloned() else {
                continue;
            };

            let (in_tx, in_rx) = mpsc::unbounded_channel();
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            in_txs.insert(*kind, in_tx);
            out_streams.push(UnboundedReceiverStream::new(out_rx));
            tracker.spawn(stage_worker(stage, in_rx, out_tx));
        }

        let mut outstanding: BTreeSet<String> = batch.iter().map(|(name, _)| name.clone()).collect();

        for (model_name, pipeline) in batch {
            let item = DeploymentItem::new(model_name, pipeline);
            route(item, &in_txs, &log_tx, &mut outstanding).await;
        }

        let mut merged = select_all(out_streams);
        while !outstanding.is_empty() {
            match merged.next().await {
                Some(EngineEvent::Logs(logs)) => {
                    for log in logs {
                        let _ = log_tx.send(log).await;
                    }
                }
                Some(EngineEvent::Item(item)) => {
                    route(item, &in_txs, &log_tx, &mut outstanding).await;
                }
                // Every worker's output queue closed with items still
                // outstanding -- a worker panicked mid-item. Nothing left
                // to drive those items further; fall through to cleanup
                // rather than spin.
                None => break,
            }
        }

        drop(in_txs);
        tracker.close();
        tracker.wait().await;

        self.clean_temp_dir().await;
        Ok(())
    }

    async fn clean_temp_dir(&self) {
        if self.temp_dir.is_dir() {
            if let Err(e) = tokio::fs::remove_dir_all(&self.temp_dir).await {
                tracing::warn!(dir = %self.temp_dir.display(), error = %e, "failed to clean temp directory");
            }
        }
    }
}

async fn stage_worker(stage: Arc<dyn Stage>, mut in_rx: mpsc::UnboundedReceiver<DeploymentItem>, out_tx: mpsc::UnboundedSender<EngineEvent>) {
    while let Some(item) = in_rx.recv().await {
        let output = run_stage_boundary(stage.as_ref(), item).await;
        if !output.logs.is_empty() && out_tx.send(EngineEvent::Logs(output.logs)).is_err() {
            break;
        }
        if out_tx.send(EngineEvent::Item(output.item)).is_err() {
            break;
        }
    }
}

/// Routing algorithm for a received `DeploymentItem`: retire finished
/// items, retire and log items whose pipeline ran dry without passing
/// through `Finish`, or pop the head stage and hand the item to its worker
/// -- clearing `extended_info` on hand-off, since it is only a summary of
/// the stage that just set it.
async fn route(
    mut item: DeploymentItem,
    in_txs: &BTreeMap<StageKind, mpsc::UnboundedSender<DeploymentItem>>,
    log_tx: &mpsc::Sender<LogRecord>,
    outstanding: &mut BTreeSet<String>,
) {
    if item.finished {
        outstanding.remove(&item.model_name);
        return;
    }

    if item.remaining_stages.is_empty() {
        outstanding.remove(&item.model_name);
        let _ = log_tx.send(LogRecord::info(&item.model_name, "DEPLOYMENT FINISHED")).await;
        return;
    }

    let next = item.remaining_stages.remove(0);
    item.extended_info = None;
    let model_name = item.model_name.clone();

    match in_txs.get(&next) {
        Some(tx) if tx.send(item).is_ok() => {}
        _ => {
            outstanding.remove(&model_name);
            let log = LogRecord::error(
                &model_name,
                format!("[{model_name}] [{}]: no worker available for this stage", next.name()),
            );
            let _ = log_tx.send(log).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct NoopStage(StageKind);

    #[async_trait]
    impl Stage for NoopStage {
        fn kind(&self) -> StageKind {
            self.0
        }

        async fn act(&self, item: DeploymentItem) -> Result<crate::stage::ActOutput> {
            Ok(crate::stage::ActOutput::new(item))
        }
    }

    struct FailingStage(StageKind, Arc<AtomicUsize>);

    #[async_trait]
    impl Stage for FailingStage {
        fn kind(&self) -> StageKind {
            self.0
        }

        async fn act(&self, _item: DeploymentItem) -> Result<crate::stage::ActOutput> {
            self.1.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("synthetic stage failure")
        }
    }

    fn engine_with(stages: Vec<Arc<dyn Stage>>, temp_dir: PathBuf) -> Engine {
        let map = stages.into_iter().map(|s| (s.kind(), s)).collect();
        Engine::new(map, temp_dir)
    }

    async fn drain_logs(mut rx: mpsc::Receiver<LogRecord>) -> Vec<LogRecord> {
        let mut out = Vec::new();
        while let Ok(Some(record)) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
            out.push(record);
        }
        out
    }

    #[tokio::test]
    async fn two_independent_pipelines_retire_independently() {
        let engine = engine_with(
            vec![
                Arc::new(NoopStage(StageKind::MakeFiles)),
                Arc::new(NoopStage(StageKind::Finish)),
            ],
            std::env::temp_dir().join("engine_test_a"),
        );

        let (log_tx, log_rx) = mpsc::channel(64);
        let batch = vec![
            ("model_a".to_string(), vec![StageKind::MakeFiles, StageKind::Finish]),
            ("model_b".to_string(), vec![StageKind::Finish]),
        ];

        engine.run(batch, log_tx).await.unwrap();
        let logs = drain_logs(log_rx).await;

        assert!(logs.iter().any(|l| l.model_name == "model_a" && l.message == "DEPLOYMENT FINISHED"));
        assert!(logs.iter().any(|l| l.model_name == "model_b" && l.message == "DEPLOYMENT FINISHED"));
    }

    #[tokio::test]
    async fn a_failing_stage_does_not_block_other_items() {
        let failures = Arc::new(AtomicUsize::new(0));
        let engine = engine_with(
            vec![
                Arc::new(FailingStage(StageKind::BuildImage, failures.clone())),
                Arc::new(NoopStage(StageKind::Finish)),
            ],
            std::env::temp_dir().join("engine_test_b"),
        );

        let (log_tx, log_rx) = mpsc::channel(64);
        let batch = vec![
            ("model_a".to_string(), vec![StageKind::BuildImage, StageKind::Finish]),
            ("model_b".to_string(), vec![StageKind::Finish]),
        ];

        engine.run(batch, log_tx).await.unwrap();
        let logs = drain_logs(log_rx).await;

        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert!(logs.iter().any(|l| l.model_name == "model_a" && l.level == crate::stage::LogLevel::Error));
        assert!(logs.iter().any(|l| l.model_name == "model_b" && l.message == "DEPLOYMENT FINISHED"));
    }

    #[tokio::test]
    async fn item_reaching_a_stage_with_no_worker_retires_with_error_log() {
        // PushToDockerHub was skipped because no credentials were configured;
        // no worker was registered for it.
        let engine = engine_with(vec![Arc::new(NoopStage(StageKind::MakeFiles))], std::env::temp_dir().join("engine_test_c"));

        let (log_tx, log_rx) = mpsc::channel(64);
        let batch = vec![("model_a".to_string(), vec![StageKind::MakeFiles, StageKind::PushToDockerHub])];

        engine.run(batch, log_tx).await.unwrap();
        let logs = drain_logs(log_rx).await;

        assert!(logs.iter().any(|l| l.level == crate::stage::LogLevel::Error && l.message.contains("no worker available")));
    }
}
