pub mod interpolate;
pub mod model;
pub mod validate;

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};

use interpolate::expand_fixed_point;
use model::{
    GroupsDoc, ModelDescriptor, ModelFields, ModelsDoc, OverrideDoc, RootConfig, RuntimeRequirements,
    TemplatesDoc,
};

/// Everything the configuration layer resolves for one batch: the root
/// config plus every model descriptor it produced, plus the configured
/// groups (for the `groups` CLI verb and for `--group` expansion).
pub struct ResolvedConfig {
    pub root: RootConfig,
    pub models: BTreeMap<String, ModelDescriptor>,
    pub groups: BTreeMap<String, Vec<String>>,
}

/// Load and merge the five input documents: `config.yaml`,
/// `model_groups.yaml`, `templates.yaml`, a directory of per-model
/// documents under `models/`, and an optional override document.
///
/// Merge order per model is `templates["_root"]` -> `templates[TEMPLATE]`
/// -> the model's own document -> the override document's entry for that
/// model.
pub fn load_config(config_dir: &Path, override_file: Option<&Path>) -> Result<ResolvedConfig> {
    let root: RootConfig = read_yaml(&config_dir.join("config.yaml"))?;
    let groups: GroupsDoc = read_yaml(&config_dir.join("model_groups.yaml"))?;
    let templates: TemplatesDoc = read_yaml(&config_dir.join("templates.yaml"))?;

    let models_dir = config_dir.join("models");
    let mut models_doc = ModelsDoc::default();
    let mut model_sources: BTreeMap<String, std::path::PathBuf> = BTreeMap::new();
    if models_dir.is_dir() {
        let mut paths: Vec<_> = std::fs::read_dir(&models_dir)
            .with_context(|| format!("reading {}", models_dir.display()))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        paths.sort();

        for path in paths {
            if !path.is_file() {
                continue;
            }
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let doc: ModelsDoc = serde_yaml::from_str(&raw)
                .with_context(|| format!("parsing {}", path.display()))?;
            for (name, fields) in doc.0 {
                if let Some(existing) = model_sources.get(&name) {
                    let diagnostic = validate::duplicate_model_name(raw.clone(), &path.display().to_string(), &name);
                    return Err(anyhow::Error::new(diagnostic))
                        .with_context(|| format!("already defined in {}", existing.display()));
                }
                model_sources.insert(name.clone(), path.clone());
                models_doc.0.insert(name, fields);
            }
        }
    }

    let override_doc: OverrideDoc = match override_file {
        Some(path) => read_yaml(path)?,
        None => OverrideDoc::default(),
    };

    let root_template = templates
        .0
        .get("_root")
        .cloned()
        .unwrap_or_default();

    let mut models = BTreeMap::new();
    for (full_name, own_fields) in &models_doc.0 {
        let source_path = model_sources.get(full_name);
        let (raw, filename) = match source_path {
            Some(path) => (
                std::fs::read_to_string(path).unwrap_or_default(),
                path.display().to_string(),
            ),
            None => (String::new(), "<models/>".to_string()),
        };

        let descriptor = build_descriptor(
            full_name,
            own_fields,
            &root_template,
            &templates,
            override_doc.0.get(full_name),
            &root,
            &raw,
            &filename,
        )
        .with_context(|| format!("resolving model '{full_name}'"))?;

        models.insert(full_name.clone(), descriptor);
    }

    Ok(ResolvedConfig {
        root,
        models,
        groups: groups.0,
    })
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

#[allow(clippy::too_many_arguments)]
fn build_descriptor(
    full_name: &str,
    own_fields: &ModelFields,
    root_template: &ModelFields,
    templates: &TemplatesDoc,
    override_fields: Option<&ModelFields>,
    root: &RootConfig,
    raw_source: &str,
    source_filename: &str,
) -> Result<ModelDescriptor> {
    let (prefix, model_name) = full_name.split_once('_').ok_or_else(|| {
        anyhow::Error::new(validate::malformed_full_name(
            raw_source.to_string(),
            source_filename,
            full_name,
        ))
    })?;

    let template_name = own_fields.get_str("TEMPLATE").ok_or_else(|| {
        anyhow::Error::new(validate::missing_field(
            raw_source.to_string(),
            source_filename,
            full_name,
            "TEMPLATE",
        ))
    })?;
    let template_fields = templates.0.get(&template_name).ok_or_else(|| {
        anyhow::Error::new(validate::unknown_template(
            raw_source.to_string(),
            source_filename,
            full_name,
            &template_name,
        ))
    })?;

    // Merge order, low to high precedence.
    let mut merged = root_template.clone();
    merged.merge_from(template_fields);
    merged.merge_from(own_fields);
    if let Some(ov) = override_fields {
        merged.merge_from(ov);
    }

    merged.0.insert(
        "FULL_MODEL_NAME".to_string(),
        serde_yaml::Value::String(full_name.to_string()),
    );
    merged.0.insert(
        "PREFIX".to_string(),
        serde_yaml::Value::String(prefix.to_string()),
    );
    merged.0.insert(
        "MODEL_NAME".to_string(),
        serde_yaml::Value::String(model_name.to_string()),
    );
    merged.0.insert(
        "DOCKER_REGISTRY".to_string(),
        serde_yaml::Value::String(root.docker_registry.clone()),
    );

    let expanded = expand_fixed_point(&merged).map_err(|e| {
        anyhow::Error::new(validate::placeholder_expansion(
            raw_source.to_string(),
            source_filename,
            full_name,
            e,
        ))
    })?;

    let dashed_name = full_name.replace('_', "-");
    let image_tag = format!("{}/{}/{}", root.docker_registry, prefix, model_name);

    let kube_deployment_file = expanded
        .get_str("KUBER_DP_FILE")
        .unwrap_or_else(|| format!("{prefix}_{model_name}_dp.yaml"));
    let kube_service_file = expanded
        .get_str("KUBER_LB_FILE")
        .unwrap_or_else(|| format!("{prefix}_{model_name}_lb.yaml"));

    let runtime_requirements = if root.gpu_templates.iter().any(|t| t == &template_name) {
        RuntimeRequirements {
            gpu_device_index: root.local_gpu_device_index,
            runtime: Some("nvidia".to_string()),
        }
    } else {
        RuntimeRequirements::default()
    };

    Ok(ModelDescriptor {
        full_name: full_name.to_string(),
        prefix: prefix.to_string(),
        model_name: model_name.to_string(),
        dashed_name: dashed_name.clone(),

        image_tag,
        build_context_path: root.paths.models_dir.join(full_name),
        container_port: expanded.get_u16("PORT").ok_or_else(|| {
            anyhow::Error::new(validate::missing_field(
                raw_source.to_string(),
                source_filename,
                full_name,
                "PORT",
            ))
        })?,

        runtime_requirements,

        kube_deployment_name: format!("{dashed_name}-dp"),
        kube_deployment_file: root.paths.kuber_configs_dir.join(full_name).join(kube_deployment_file),
        kube_service_name: format!("{dashed_name}-lb"),
        kube_service_file: root.paths.kuber_configs_dir.join(full_name).join(kube_service_file),
        kube_configs_dir: root.paths.kuber_configs_dir.join(full_name),

        image_probe_url: expanded.get_str("test_image_url").ok_or_else(|| {
            anyhow::Error::new(validate::missing_field(
                raw_source.to_string(),
                source_filename,
                full_name,
                "test_image_url",
            ))
        })?,
        image_probe_timeout_sec: expanded.get_f64("image_polling_timeout_sec").unwrap_or(30.0),
        deployment_probe_url: expanded.get_str("test_deployment_url").ok_or_else(|| {
            anyhow::Error::new(validate::missing_field(
                raw_source.to_string(),
                source_filename,
                full_name,
                "test_deployment_url",
            ))
        })?,
        deployment_probe_timeout_sec: expanded
            .get_f64("deployment_polling_timeout_sec")
            .unwrap_or(60.0),

        model_args: expanded.get_str_list("MODEL_ARGS"),
        build_args: expanded.get_str_map("BUILD_ARGS"),

        pipeline_name: expanded
            .get_str("PIPELINE")
            .unwrap_or_else(|| root.default_pipeline.clone()),

        serialize_config: expanded.get_bool("serialize_config").unwrap_or(false),
        template: template_name,
        fields: expanded,
    })
}
