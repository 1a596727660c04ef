use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::config::model::ModelDescriptor;
use crate::config::interpolate::expand_string;
use crate::stage::{ActOutput, DeploymentItem, LogRecord, Stage, StageKind};

/// Materializes one model's build directory from its template: copy
/// `templates/<TEMPLATE>` into a scratch directory under `temp_dir`, expand
/// `{{NAME}}` placeholders in every file's contents, rename the canonical
/// template filenames to the descriptor's resolved names, split the
/// Kubernetes manifests out into `kuber_configs_dir`, and finally move the
/// scratch directory into place under `models_dir`.
pub struct MakeFilesStage {
    pub temp_dir: std::path::PathBuf,
    pub templates_dir: std::path::PathBuf,
    pub models: std::collections::BTreeMap<String, ModelDescriptor>,
}

#[async_trait]
impl Stage for MakeFilesStage {
    fn kind(&self) -> StageKind {
        StageKind::MakeFiles
    }

    async fn act(&self, item: DeploymentItem) -> Result<ActOutput> {
        let descriptor = self
            .models
            .get(&item.model_name)
            .with_context(|| format!("no descriptor for model '{}'", item.model_name))?;

        let scratch_dir = self.temp_dir.join(&descriptor.full_name);
        safe_delete_path(&scratch_dir)?;

        let template_dir = self.templates_dir.join(&descriptor.template);
        copy_dir_recursive(&template_dir, &scratch_dir)
            .with_context(|| format!("copying template '{}'", descriptor.template))?;

        expand_placeholders_in_tree(&scratch_dir, descriptor)?;

        let run_file = descriptor.fields.get_str("RUN_FILE").unwrap_or_else(|| "run_model.sh".to_string());
        rename_if_present(&scratch_dir.join("run_model.sh"), &scratch_dir.join(&run_file))?;
        rename_if_present(&scratch_dir.join("dockerignore"), &scratch_dir.join(".dockerignore"))?;

        safe_delete_path(&descriptor.kube_configs_dir)?;
        std::fs::create_dir_all(&descriptor.kube_configs_dir)
            .with_context(|| format!("creating {}", descriptor.kube_configs_dir.display()))?;

        move_required(
            &scratch_dir.join("kuber_dp.yaml"),
            &descriptor.kube_deployment_file,
        )?;
        move_if_present(&scratch_dir.join("kuber_lb.yaml"), &descriptor.kube_service_file)?;

        safe_delete_path(&descriptor.build_context_path)?;
        std::fs::rename(&scratch_dir, &descriptor.build_context_path).with_context(|| {
            format!(
                "moving {} to {}",
                scratch_dir.display(),
                descriptor.build_context_path.display()
            )
        })?;

        if descriptor.serialize_config {
            let path = descriptor.build_context_path.join("deployment_config.json");
            let as_json: serde_json::Value =
                serde_json::to_value(&descriptor.fields.0).context("serializing model config")?;
            let json = serde_json::to_string_pretty(&as_json)?;
            std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        }

        let log = LogRecord::info(
            &item.model_name,
            format!("[{}] [make deployment files]: stage finished", item.model_name),
        );
        Ok(ActOutput::new(item).with_log(log))
    }
}

/// Reject deleting a path that resolves to the filesystem root.
fn safe_delete_path(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if canonical == Path::new("/") {
        bail!("refusing to delete root path deletion attempt");
    }
    if path.is_dir() {
        std::fs::remove_dir_all(path).with_context(|| format!("removing {}", path.display()))?;
    } else {
        std::fs::remove_file(path).with_context(|| format!("removing {}", path.display()))?;
    }
    Ok(())
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let dst_path = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &dst_path)?;
        } else {
            std::fs::copy(entry.path(), &dst_path)?;
        }
    }
    Ok(())
}

fn expand_placeholders_in_tree(dir: &Path, descriptor: &ModelDescriptor) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            expand_placeholders_in_tree(&path, descriptor)?;
        } else {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let expanded = expand_string(&content, &descriptor.fields)
                .with_context(|| format!("expanding placeholders in {}", path.display()))?;
            std::fs::write(&path, expanded).with_context(|| format!("writing {}", path.display()))?;
        }
    }
    Ok(())
}

fn rename_if_present(from: &Path, to: &Path) -> Result<()> {
    if from.is_file() {
        std::fs::rename(from, to)
            .with_context(|| format!("renaming {} to {}", from.display(), to.display()))?;
    }
    Ok(())
}

fn move_if_present(from: &Path, to: &Path) -> Result<()> {
    if from.is_file() {
        std::fs::rename(from, to)
            .with_context(|| format!("moving {} to {}", from.display(), to.display()))?;
    }
    Ok(())
}

/// Like `move_if_present`, but the source file is mandatory -- every
/// template must provide a deployment manifest, unlike the LoadBalancer
/// service manifest, which a model may omit entirely.
fn move_required(from: &Path, to: &Path) -> Result<()> {
    if !from.is_file() {
        bail!("template is missing required file {}", from.display());
    }
    std::fs::rename(from, to).with_context(|| format!("moving {} to {}", from.display(), to.display()))
}
