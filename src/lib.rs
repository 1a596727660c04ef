pub mod cli;
pub mod config;
pub mod docker;
pub mod engine;
pub mod kube_client;
pub mod logging;
pub mod pipeline;
pub mod poll;
pub mod stage;
