use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// GPU / runtime attachment a model needs when it is tested or deployed.
///
/// Populated by the merge layer: a model's runtime requirements are "needs
/// GPU" exactly when its template name is listed in the root config's
/// `gpu_templates`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeRequirements {
    pub gpu_device_index: Option<u32>,
    pub runtime: Option<String>,
}

/// Fully-resolved, immutable per-model descriptor. Produced once by the
/// configuration layer and never mutated by the engine or by stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub full_name: String,
    pub prefix: String,
    pub model_name: String,
    pub dashed_name: String,

    pub image_tag: String,
    pub build_context_path: PathBuf,
    pub container_port: u16,

    pub runtime_requirements: RuntimeRequirements,

    pub kube_deployment_name: String,
    pub kube_deployment_file: PathBuf,
    pub kube_service_name: String,
    pub kube_service_file: PathBuf,
    pub kube_configs_dir: PathBuf,

    pub image_probe_url: String,
    pub image_probe_timeout_sec: f64,
    pub deployment_probe_url: String,
    pub deployment_probe_timeout_sec: f64,

    pub model_args: Vec<String>,
    pub build_args: BTreeMap<String, String>,

    pub pipeline_name: String,

    /// When true, `MakeFiles` additionally serializes this descriptor as
    /// `deployment_config.json` inside the build context.
    pub serialize_config: bool,

    /// Template this descriptor was merged from; retained for diagnostics
    /// and for the `gpu_templates` lookup at merge time.
    pub template: String,

    /// The fully merged and placeholder-expanded field document this
    /// descriptor was derived from. `MakeFiles` substitutes template file
    /// contents against this -- templates can reference any custom field a
    /// model or template document defines, not only the fixed fields above.
    #[serde(skip)]
    pub fields: ModelFields,
}

/// Root configuration document (`config.yaml`): paths, registries, shared
/// probe defaults, GPU index, log directories, Docker Hub credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct RootConfig {
    pub paths: PathsConfig,
    pub docker_base_url: String,
    pub docker_registry: String,

    #[serde(default)]
    pub dockerhub_registry: Option<String>,
    #[serde(default)]
    pub dockerhub_username: Option<String>,
    #[serde(default)]
    pub dockerhub_password: Option<String>,

    #[serde(default)]
    pub local_gpu_device_index: Option<u32>,
    #[serde(default)]
    pub gpu_templates: Vec<String>,

    pub local_log_dir: PathBuf,
    pub container_log_dir: PathBuf,

    #[serde(default = "default_pipeline")]
    pub default_pipeline: String,
}

fn default_pipeline() -> String {
    "all".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    pub models_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub kuber_configs_dir: PathBuf,
    pub temp_dir: PathBuf,
}

/// `model_groups.yaml`: group name to list of full model names.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupsDoc(pub BTreeMap<String, Vec<String>>);

/// `templates.yaml`: template name to default field map. The `_root`
/// template's fields are merged into every model ahead of the model's own
/// template.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplatesDoc(pub BTreeMap<String, ModelFields>);

/// A loose field map for one merge layer (template, per-model document, or
/// override document). Fields missing here fall through to a lower-priority
/// layer; `serde_yaml::Value` lets string, list and map fields all round
/// through the placeholder interpolation step before being typed.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ModelFields(pub BTreeMap<String, serde_yaml::Value>);

impl ModelFields {
    pub fn merge_from(&mut self, other: &ModelFields) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.0.get(key).and_then(|v| match v {
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            serde_yaml::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_u16(&self, key: &str) -> Option<u16> {
        self.0.get(key).and_then(|v| v.as_u64()).map(|n| n as u16)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_str_list(&self, key: &str) -> Vec<String> {
        self.0
            .get(key)
            .and_then(|v| v.as_sequence())
            .map(|seq| {
                seq.iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_str_map(&self, key: &str) -> BTreeMap<String, String> {
        self.0
            .get(key)
            .and_then(|v| v.as_mapping())
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| {
                        let k = k.as_str()?.to_string();
                        let v = match v {
                            serde_yaml::Value::String(s) => s.clone(),
                            other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
                        };
                        Some((k, v))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// One per-model document under `models/`: maps full model name to its own
/// field overrides (at minimum `TEMPLATE`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelsDoc(pub BTreeMap<String, ModelFields>);

/// Optional `--override-file` document, same shape as `ModelsDoc`, merged
/// last per model.
pub type OverrideDoc = ModelsDoc;
