use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Configuration-layer error taxonomy: duplicate model name, unresolved
/// placeholder, unknown template, unknown pipeline, missing required
/// descriptor field. Surfaced immediately to the CLI; the batch never
/// starts when any of these are present.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigDiagnostic {
    #[error("duplicate full model name `{full_name}`")]
    #[diagnostic(code(cluster_deployer::duplicate_model_name))]
    DuplicateModelName {
        #[source_code]
        src: NamedSource<String>,
        #[label("this full model name is already used by another entry")]
        span: SourceSpan,
        full_name: String,
    },

    #[error("model name `{full_name}` is not in `<prefix>_<name>` format")]
    #[diagnostic(code(cluster_deployer::malformed_full_name))]
    MalformedFullName {
        #[source_code]
        src: NamedSource<String>,
        #[label("expected a single '_' separating prefix and name")]
        span: SourceSpan,
        full_name: String,
    },

    #[error("model `{full_name}` references unknown template `{template}`")]
    #[diagnostic(code(cluster_deployer::unknown_template))]
    UnknownTemplate {
        #[source_code]
        src: NamedSource<String>,
        #[label("no such template in templates.yaml")]
        span: SourceSpan,
        full_name: String,
        template: String,
    },

    #[error("unknown pipeline `{pipeline}`")]
    #[diagnostic(code(cluster_deployer::unknown_pipeline))]
    UnknownPipeline {
        #[source_code]
        src: NamedSource<String>,
        #[label("not present in the pipeline catalog")]
        span: SourceSpan,
        pipeline: String,
    },

    #[error("model `{full_name}` is missing required field `{field}`")]
    #[diagnostic(code(cluster_deployer::missing_field))]
    MissingField {
        #[source_code]
        src: NamedSource<String>,
        #[label("required by every deployable model")]
        span: SourceSpan,
        full_name: String,
        field: String,
    },

    #[error("unknown group `{group}`")]
    #[diagnostic(code(cluster_deployer::unknown_group))]
    UnknownGroup {
        #[source_code]
        src: NamedSource<String>,
        #[label("not present in model_groups.yaml")]
        span: SourceSpan,
        group: String,
    },

    #[error("placeholder expansion failed for `{full_name}`: {source}")]
    #[diagnostic(code(cluster_deployer::placeholder_expansion))]
    PlaceholderExpansion {
        #[source_code]
        src: NamedSource<String>,
        #[label("in this model's merged document")]
        span: SourceSpan,
        full_name: String,
        source: crate::config::interpolate::InterpolationError,
    },
}

/// Byte offset of a top-level YAML mapping key like `stand_ner_ru:`. Falls
/// back to a zero-length span at the start of the document when the key
/// can't be found verbatim (e.g. it was quoted).
fn find_key_span(source: &str, key: &str) -> SourceSpan {
    let needle = format!("{key}:");
    match source.find(&needle) {
        Some(pos) => (pos, key.len()).into(),
        None => (0, 0).into(),
    }
}

/// Byte offset of a nested field's value under a model's own key, e.g.
/// `field:` somewhere after `stand_ner_ru:`. Falls back to the model's own
/// key span when the field can't be found (field inherited from a template
/// or the `_root` layer, not present in this file at all).
fn find_field_span(source: &str, model_key: &str, field: &str) -> SourceSpan {
    let search_start = source.find(&format!("{model_key}:")).unwrap_or(0);
    let after_key = &source[search_start..];
    let needle = format!("{field}:");
    match after_key.find(&needle) {
        Some(rel_pos) => (search_start + rel_pos, field.len()).into(),
        None => find_key_span(source, model_key),
    }
}

/// Build a `DuplicateModelName` diagnostic pointing at `full_name`'s
/// mapping key inside the second file that defines it.
pub fn duplicate_model_name(source: String, filename: &str, full_name: &str) -> ConfigDiagnostic {
    let span = find_key_span(&source, full_name);
    ConfigDiagnostic::DuplicateModelName {
        src: NamedSource::new(filename, source),
        span,
        full_name: full_name.to_string(),
    }
}

/// Build a `MalformedFullName` diagnostic pointing at the offending key.
pub fn malformed_full_name(source: String, filename: &str, full_name: &str) -> ConfigDiagnostic {
    let span = find_key_span(&source, full_name);
    ConfigDiagnostic::MalformedFullName {
        src: NamedSource::new(filename, source),
        span,
        full_name: full_name.to_string(),
    }
}

/// Build an `UnknownTemplate` diagnostic pointing at the model's `TEMPLATE` field.
pub fn unknown_template(source: String, filename: &str, full_name: &str, template: &str) -> ConfigDiagnostic {
    let span = find_field_span(&source, full_name, "TEMPLATE");
    ConfigDiagnostic::UnknownTemplate {
        src: NamedSource::new(filename, source),
        span,
        full_name: full_name.to_string(),
        template: template.to_string(),
    }
}

/// Build a `MissingField` diagnostic pointing at the model's own key (the
/// field itself is, by definition, absent -- there is nothing more specific
/// to underline).
pub fn missing_field(source: String, filename: &str, full_name: &str, field: &str) -> ConfigDiagnostic {
    let span = find_key_span(&source, full_name);
    ConfigDiagnostic::MissingField {
        src: NamedSource::new(filename, source),
        span,
        full_name: full_name.to_string(),
        field: field.to_string(),
    }
}

/// Build a `PlaceholderExpansion` diagnostic wrapping the underlying
/// interpolation error.
pub fn placeholder_expansion(
    source: String,
    filename: &str,
    full_name: &str,
    source_err: crate::config::interpolate::InterpolationError,
) -> ConfigDiagnostic {
    let span = find_key_span(&source, full_name);
    ConfigDiagnostic::PlaceholderExpansion {
        src: NamedSource::new(filename, source),
        span,
        full_name: full_name.to_string(),
        source: source_err,
    }
}

/// Build an `UnknownPipeline` diagnostic. There is no single-file source for
/// a `--pipeline` CLI argument, so the "source" is the argument itself.
pub fn unknown_pipeline(pipeline: &str) -> ConfigDiagnostic {
    ConfigDiagnostic::UnknownPipeline {
        src: NamedSource::new("<--pipeline argument>", pipeline.to_string()),
        span: (0, pipeline.len()).into(),
        pipeline: pipeline.to_string(),
    }
}

/// Build an `UnknownGroup` diagnostic for a `--group` argument that isn't
/// present in `model_groups.yaml`.
pub fn unknown_group(source: String, filename: &str, group: &str) -> ConfigDiagnostic {
    let span = find_key_span(&source, group);
    ConfigDiagnostic::UnknownGroup {
        src: NamedSource::new(filename, source),
        span,
        group: group.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_span() -> SourceSpan {
        (0, 0).into()
    }

    #[test]
    fn duplicate_model_name_renders_full_name() {
        let err = ConfigDiagnostic::DuplicateModelName {
            src: NamedSource::new("models/x.yaml", String::new()),
            span: dummy_span(),
            full_name: "stand_ner_ru".to_string(),
        };
        assert!(err.to_string().contains("stand_ner_ru"));
    }

    #[test]
    fn duplicate_model_name_finds_mapping_key_span() {
        let source = "stand_ner_ru:\n  TEMPLATE: base\n".to_string();
        let diagnostic = duplicate_model_name(source, "models/b.yaml", "stand_ner_ru");
        match diagnostic {
            ConfigDiagnostic::DuplicateModelName { span, .. } => {
                assert_eq!(span.offset(), 0);
                assert_eq!(span.len(), "stand_ner_ru".len());
            }
            _ => panic!("expected DuplicateModelName"),
        }
    }

    #[test]
    fn malformed_full_name_message() {
        let err = ConfigDiagnostic::MalformedFullName {
            src: NamedSource::new("models/x.yaml", String::new()),
            span: dummy_span(),
            full_name: "noprefix".to_string(),
        };
        assert!(err.to_string().contains("<prefix>_<name>"));
    }
}
