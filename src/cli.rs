use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "cluster-deployer", version, about = "Staged pipeline for deploying ML model services to Kubernetes")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Directory holding config.yaml, model_groups.yaml, templates.yaml and models/
    #[arg(short = 'c', long, global = true, default_value = ".")]
    pub config_dir: PathBuf,

    /// Optional document overriding individual models' fields, merged last
    #[arg(long, global = true)]
    pub override_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a batch of models through a pipeline
    Build {
        /// Full model name to deploy (repeatable)
        #[arg(long = "model")]
        model: Vec<String>,

        /// Group name to expand into its member models (repeatable)
        #[arg(long = "group")]
        group: Vec<String>,

        /// Pipeline name overriding each selected model's own pipeline
        #[arg(long)]
        pipeline: Option<String>,

        /// Docker Hub password, enabling the push-to-docker-hub stage
        #[arg(long, env = "DOCKERHUB_PASS")]
        dockerhub_pass: Option<String>,
    },
    /// List resolved model names and their default pipeline
    Models,
    /// List configured groups and their member models
    Groups,
    /// List the pipeline catalog with descriptions
    Pipelines,
}
