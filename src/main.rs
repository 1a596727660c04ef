use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::Table;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use cluster_deployer::cli::{Cli, Commands};
use cluster_deployer::config::model::{ModelDescriptor, RootConfig};
use cluster_deployer::config::{self, validate, ResolvedConfig};
use cluster_deployer::docker;
use cluster_deployer::engine::Engine;
use cluster_deployer::kube_client::KubeClient;
use cluster_deployer::logging::LogFabric;
use cluster_deployer::pipeline::{self, Pipeline};
use cluster_deployer::stage::build_image::BuildImageStage;
use cluster_deployer::stage::delete_image::DeleteImageStage;
use cluster_deployer::stage::delete_kubernetes::DeleteKubernetesStage;
use cluster_deployer::stage::deploy_kubernetes::DeployKubernetesStage;
use cluster_deployer::stage::finish::FinishStage;
use cluster_deployer::stage::make_files::MakeFilesStage;
use cluster_deployer::stage::push_docker_hub::PushDockerHubStage;
use cluster_deployer::stage::push_pull_image::{PullImageStage, PushImageStage};
use cluster_deployer::stage::test_image::TestImageStage;
use cluster_deployer::stage::test_kubernetes::TestKubernetesStage;
use cluster_deployer::stage::{Stage, StageKind};

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let resolved = config::load_config(&cli.global.config_dir, cli.global.override_file.as_deref())?;

    match cli.command {
        Commands::Models => print_models(&resolved),
        Commands::Groups => print_groups(&resolved),
        Commands::Pipelines => print_pipelines(),
        Commands::Build {
            model,
            group,
            pipeline,
            dockerhub_pass,
        } => run_build(resolved, model, group, pipeline, dockerhub_pass).await,
    }
}

fn print_models(resolved: &ResolvedConfig) -> Result<()> {
    let mut table = Table::new();
    table.set_header(vec!["model", "pipeline"]);
    for (name, descriptor) in &resolved.models {
        table.add_row(vec![name.clone(), descriptor.pipeline_name.clone()]);
    }
    println!("{table}");
    Ok(())
}

fn print_groups(resolved: &ResolvedConfig) -> Result<()> {
    let mut table = Table::new();
    table.set_header(vec!["group", "members"]);
    for (name, members) in &resolved.groups {
        table.add_row(vec![name.clone(), members.join(", ")]);
    }
    println!("{table}");
    Ok(())
}

fn print_pipelines() -> Result<()> {
    let mut table = Table::new();
    table.set_header(vec!["pipeline", "description"]);
    for p in pipeline::catalog() {
        table.add_row(vec![p.name.clone(), p.description.to_string()]);
    }
    println!("{table}");
    Ok(())
}

async fn run_build(
    resolved: ResolvedConfig,
    model_names: Vec<String>,
    group_names: Vec<String>,
    pipeline_override: Option<String>,
    dockerhub_pass: Option<String>,
) -> Result<()> {
    if model_names.is_empty() && group_names.is_empty() {
        anyhow::bail!("build requires at least one of --model or --group");
    }

    let ResolvedConfig { root, models, groups } = resolved;

    let mut selected: BTreeSet<String> = BTreeSet::new();
    for name in &model_names {
        if !models.contains_key(name) {
            anyhow::bail!("unknown model '{name}'");
        }
        selected.insert(name.clone());
    }
    for group_name in &group_names {
        let members = groups.get(group_name).ok_or_else(|| {
            anyhow::Error::new(validate::unknown_group(String::new(), "model_groups.yaml", group_name))
        })?;
        for member in members {
            if !models.contains_key(member) {
                anyhow::bail!("group '{group_name}' references unknown model '{member}'");
            }
            selected.insert(member.clone());
        }
    }

    let override_pipeline: Option<Pipeline> = match &pipeline_override {
        Some(name) => {
            Some(pipeline::lookup(name).ok_or_else(|| anyhow::Error::new(validate::unknown_pipeline(name)))?)
        }
        None => None,
    };

    let mut task_info = Vec::new();
    let mut batch = Vec::new();
    let mut referenced: BTreeSet<StageKind> = BTreeSet::new();

    for model_name in &selected {
        let descriptor = &models[model_name];
        let effective = match &override_pipeline {
            Some(p) => p.clone(),
            None => pipeline::lookup(&descriptor.pipeline_name)
                .ok_or_else(|| anyhow::Error::new(validate::unknown_pipeline(&descriptor.pipeline_name)))?,
        };
        let stages = effective.stages_with_terminal();
        referenced.extend(stages.iter().copied());
        task_info.push((model_name.clone(), stages.iter().map(|s| s.name().to_string()).collect()));
        batch.push((model_name.clone(), stages));
    }

    let needs_docker = referenced.iter().any(|s| {
        matches!(
            s,
            StageKind::DeleteImage
                | StageKind::BuildImage
                | StageKind::TestImage
                | StageKind::PushImage
                | StageKind::PullImage
                | StageKind::PushToDockerHub
        )
    });
    let needs_kube = referenced.iter().any(|s| {
        matches!(
            s,
            StageKind::DeployKubernetes | StageKind::DeleteKubernetes | StageKind::TestKubernetes
        )
    });

    let docker_client = if needs_docker {
        Some(docker::connect(&root.docker_base_url).await?)
    } else {
        None
    };
    let kube_client = if needs_kube {
        Some(KubeClient::try_default().await.context("connecting to Kubernetes")?)
    } else {
        None
    };
    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .context("building HTTP client")?;

    let mut stages: BTreeMap<StageKind, Arc<dyn Stage>> = BTreeMap::new();
    for kind in &referenced {
        insert_stage(
            &mut stages,
            *kind,
            &root,
            &models,
            docker_client.as_ref(),
            kube_client.as_ref(),
            &http,
            dockerhub_pass.as_deref(),
        );
    }

    let (log_tx, log_rx) = mpsc::channel(256);
    let fabric = LogFabric::new(log_rx, root.local_log_dir.clone());
    fabric.write_task_info(&task_info)?;
    let fabric_handle = tokio::spawn(fabric.run());

    let engine = Engine::new(stages, root.paths.temp_dir.clone());
    engine.run(batch, log_tx).await?;

    fabric_handle.await.context("log fabric task panicked")?;
    Ok(())
}

/// Resolves Docker Hub credentials for `PushToDockerHubStage`. Returns
/// `None` when any of registry, username, or password is missing -- the
/// stage is then left out of the catalog entirely and any item that
/// reaches it retires through the engine's "no worker available" path with
/// an error log, rather than failing the whole batch up front.
fn resolve_dockerhub_credentials(
    root: &RootConfig,
    cli_pass: Option<&str>,
) -> Option<(String, bollard::auth::DockerCredentials)> {
    let registry = root.dockerhub_registry.clone()?;
    let username = root.dockerhub_username.clone()?;
    let password = cli_pass.map(str::to_string).or_else(|| root.dockerhub_password.clone())?;
    Some((registry, docker::image::dockerhub_credentials(&username, &password)))
}

#[allow(clippy::too_many_arguments)]
fn insert_stage(
    stages: &mut BTreeMap<StageKind, Arc<dyn Stage>>,
    kind: StageKind,
    root: &RootConfig,
    models: &BTreeMap<String, ModelDescriptor>,
    docker_client: Option<&bollard::Docker>,
    kube_client: Option<&KubeClient>,
    http: &reqwest::Client,
    dockerhub_pass: Option<&str>,
) {
    match kind {
        StageKind::MakeFiles => {
            stages.insert(
                kind,
                Arc::new(MakeFilesStage {
                    temp_dir: root.paths.temp_dir.clone(),
                    templates_dir: root.paths.templates_dir.clone(),
                    models: models.clone(),
                }),
            );
        }
        StageKind::DeleteImage => {
            if let Some(docker) = docker_client {
                stages.insert(
                    kind,
                    Arc::new(DeleteImageStage {
                        docker: docker.clone(),
                        models: models.clone(),
                    }),
                );
            }
        }
        StageKind::BuildImage => {
            if let Some(docker) = docker_client {
                stages.insert(
                    kind,
                    Arc::new(BuildImageStage {
                        docker: docker.clone(),
                        models: models.clone(),
                    }),
                );
            }
        }
        StageKind::TestImage => {
            if let Some(docker) = docker_client {
                stages.insert(
                    kind,
                    Arc::new(TestImageStage {
                        docker: docker.clone(),
                        http: http.clone(),
                        models: models.clone(),
                        host_log_dir: root.local_log_dir.clone(),
                        container_log_dir: root.container_log_dir.clone(),
                    }),
                );
            }
        }
        StageKind::PushImage => {
            if let Some(docker) = docker_client {
                stages.insert(
                    kind,
                    Arc::new(PushImageStage {
                        docker: docker.clone(),
                        models: models.clone(),
                    }),
                );
            }
        }
        StageKind::PullImage => {
            if let Some(docker) = docker_client {
                stages.insert(
                    kind,
                    Arc::new(PullImageStage {
                        docker: docker.clone(),
                        models: models.clone(),
                    }),
                );
            }
        }
        StageKind::PushToDockerHub => {
            if let Some(docker) = docker_client {
                match resolve_dockerhub_credentials(root, dockerhub_pass) {
                    Some((registry, credentials)) => {
                        stages.insert(
                            kind,
                            Arc::new(PushDockerHubStage {
                                docker: docker.clone(),
                                dockerhub_registry: registry,
                                credentials: Some(credentials),
                                models: models.clone(),
                            }),
                        );
                    }
                    None => {
                        tracing::warn!(
                            "Docker Hub credentials incomplete; push-to-docker-hub stage disabled for this batch"
                        );
                    }
                }
            }
        }
        StageKind::DeployKubernetes => {
            if let Some(kube) = kube_client {
                stages.insert(
                    kind,
                    Arc::new(DeployKubernetesStage {
                        client: kube.clone(),
                        models: models.clone(),
                    }),
                );
            }
        }
        StageKind::DeleteKubernetes => {
            if let Some(kube) = kube_client {
                stages.insert(
                    kind,
                    Arc::new(DeleteKubernetesStage {
                        client: kube.clone(),
                        models: models.clone(),
                    }),
                );
            }
        }
        StageKind::TestKubernetes => {
            if let Some(kube) = kube_client {
                stages.insert(
                    kind,
                    Arc::new(TestKubernetesStage {
                        http: http.clone(),
                        models: models.clone(),
                    }),
                );
            }
        }
        StageKind::Finish => {
            stages.insert(kind, Arc::new(FinishStage));
        }
    }
}
