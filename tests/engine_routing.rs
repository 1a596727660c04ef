mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use cluster_deployer::engine::Engine;
use cluster_deployer::stage::{LogLevel, Stage, StageKind};
use tokio::sync::mpsc;

use common::{FailingRecordingStage, RecordingFinish, RecordingStage, VisitLog};

async fn drain(mut rx: mpsc::Receiver<cluster_deployer::stage::LogRecord>) -> Vec<cluster_deployer::stage::LogRecord> {
    let mut out = Vec::new();
    while let Ok(Some(record)) = tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv()).await {
        out.push(record);
    }
    out
}

fn engine_with(stages: Vec<Arc<dyn Stage>>, temp_dir: std::path::PathBuf) -> Engine {
    let map: BTreeMap<_, _> = stages.into_iter().map(|s| (s.kind(), s)).collect();
    Engine::new(map, temp_dir)
}

/// A batch of two models on independent pipelines both retire successfully,
/// and each visits exactly the pipeline declared for it at batch start.
#[tokio::test]
async fn two_models_each_visit_exactly_their_declared_pipeline() {
    let log = VisitLog::new();
    let engine = engine_with(
        vec![
            Arc::new(RecordingStage {
                kind: StageKind::MakeFiles,
                log: log.clone(),
            }),
            Arc::new(RecordingStage {
                kind: StageKind::BuildImage,
                log: log.clone(),
            }),
            Arc::new(RecordingStage {
                kind: StageKind::TestImage,
                log: log.clone(),
            }),
            Arc::new(RecordingFinish { log: log.clone() }),
        ],
        std::env::temp_dir().join("routing_test_scenario1"),
    );

    let batch = vec![
        (
            "model_a".to_string(),
            vec![StageKind::MakeFiles, StageKind::BuildImage, StageKind::Finish],
        ),
        (
            "model_b".to_string(),
            vec![
                StageKind::MakeFiles,
                StageKind::BuildImage,
                StageKind::TestImage,
                StageKind::Finish,
            ],
        ),
    ];

    let (log_tx, log_rx) = mpsc::channel(64);
    engine.run(batch, log_tx).await.unwrap();
    let logs = drain(log_rx).await;

    assert_eq!(
        log.visits_for("model_a"),
        vec![StageKind::MakeFiles, StageKind::BuildImage, StageKind::Finish]
    );
    assert_eq!(
        log.visits_for("model_b"),
        vec![
            StageKind::MakeFiles,
            StageKind::BuildImage,
            StageKind::TestImage,
            StageKind::Finish,
        ]
    );
    assert!(logs.iter().any(|l| l.model_name == "model_a" && l.message == "DEPLOYMENT FINISHED"));
    assert!(logs.iter().any(|l| l.model_name == "model_b" && l.message == "DEPLOYMENT FINISHED"));
}

/// An item that raises an error in stage k visits stages 1..k and no
/// further stage, and the failure does not block an unrelated item in the
/// same batch.
#[tokio::test]
async fn failing_stage_stops_only_its_own_item_at_that_stage() {
    let log = VisitLog::new();
    let engine = engine_with(
        vec![
            Arc::new(RecordingStage {
                kind: StageKind::MakeFiles,
                log: log.clone(),
            }),
            Arc::new(FailingRecordingStage {
                kind: StageKind::BuildImage,
                log: log.clone(),
            }),
            Arc::new(RecordingStage {
                kind: StageKind::TestImage,
                log: log.clone(),
            }),
            Arc::new(RecordingFinish { log: log.clone() }),
        ],
        std::env::temp_dir().join("routing_test_scenario2"),
    );

    let batch = vec![
        (
            "model_a".to_string(),
            vec![
                StageKind::MakeFiles,
                StageKind::BuildImage,
                StageKind::TestImage,
                StageKind::Finish,
            ],
        ),
        ("model_b".to_string(), vec![StageKind::MakeFiles, StageKind::Finish]),
    ];

    let (log_tx, log_rx) = mpsc::channel(64);
    engine.run(batch, log_tx).await.unwrap();
    let logs = drain(log_rx).await;

    // model_a visited MakeFiles then BuildImage (where it failed) and no further stage.
    assert_eq!(
        log.visits_for("model_a"),
        vec![StageKind::MakeFiles, StageKind::BuildImage]
    );
    assert_eq!(log.visits_for("model_b"), vec![StageKind::MakeFiles, StageKind::Finish]);

    assert!(logs
        .iter()
        .any(|l| l.model_name == "model_a" && l.level == LogLevel::Error));
    assert!(logs.iter().any(|l| l.model_name == "model_b" && l.message == "DEPLOYMENT FINISHED"));
}

/// A batch-level pipeline override replaces each selected model's default
/// pipeline uniformly.
#[tokio::test]
async fn pipeline_override_applies_to_every_selected_model() {
    let log = VisitLog::new();
    let engine = engine_with(
        vec![
            Arc::new(RecordingStage {
                kind: StageKind::DeleteKubernetes,
                log: log.clone(),
            }),
            Arc::new(RecordingFinish { log: log.clone() }),
        ],
        std::env::temp_dir().join("routing_test_scenario6"),
    );

    // Simulates main.rs resolving `--pipeline delete_kuber` for both models,
    // overriding whatever each model's own pipeline_name would have been.
    let override_pipeline = cluster_deployer::pipeline::lookup("delete_kuber")
        .unwrap()
        .stages_with_terminal();

    let batch = vec![
        ("model_a".to_string(), override_pipeline.clone()),
        ("model_b".to_string(), override_pipeline.clone()),
    ];

    let (log_tx, log_rx) = mpsc::channel(64);
    engine.run(batch, log_tx).await.unwrap();
    let _logs = drain(log_rx).await;

    assert_eq!(
        log.visits_for("model_a"),
        vec![StageKind::DeleteKubernetes, StageKind::Finish]
    );
    assert_eq!(
        log.visits_for("model_b"),
        vec![StageKind::DeleteKubernetes, StageKind::Finish]
    );
}

/// Every DeploymentItem processed is retired exactly once: `run` returns
/// once the outstanding set is empty, which only happens after every model
/// name has been removed via a `Finished` or empty-pipeline route.
#[tokio::test]
async fn every_item_in_the_batch_is_retired() {
    let log = VisitLog::new();
    let engine = engine_with(
        vec![Arc::new(RecordingFinish { log: log.clone() })],
        std::env::temp_dir().join("routing_test_retirement"),
    );

    let batch = (0..5)
        .map(|i| (format!("model_{i}"), vec![StageKind::Finish]))
        .collect::<Vec<_>>();

    let (log_tx, log_rx) = mpsc::channel(64);
    engine.run(batch, log_tx).await.unwrap();
    let logs = drain(log_rx).await;

    for i in 0..5 {
        let model = format!("model_{i}");
        assert_eq!(log.visits_for(&model), vec![StageKind::Finish]);
        assert_eq!(
            logs.iter().filter(|l| l.model_name == model && l.message == "DEPLOYMENT FINISHED").count(),
            1,
            "model {model} should retire exactly once"
        );
    }
}
