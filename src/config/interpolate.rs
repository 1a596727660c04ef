use std::sync::LazyLock;

use regex::Regex;

use crate::config::model::ModelFields;

/// Compiled pattern matching `{{NAME}}` placeholder expressions. There is no
/// dotted-path lookup here, every placeholder resolves against the same
/// merged document it appears in.
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Za-z_]+)\}\}").expect("placeholder regex must compile"));

#[derive(Debug, thiserror::Error)]
pub enum InterpolationError {
    #[error("unresolved placeholder '{{{{{name}}}}}' in field '{field}'")]
    UnresolvedPlaceholder { field: String, name: String },
    #[error("placeholder expansion for '{field}' did not reach a fixed point after {passes} passes (cyclic reference?)")]
    NotConverging { field: String, passes: usize },
}

const MAX_PASSES: usize = 32;

/// Replace every `{{NAME}}` occurrence in `input` with the string form of
/// `fields`'s own `NAME` entry. List/map values are substituted as their
/// compact JSON encoding.
fn substitute_once(input: &str, fields: &ModelFields) -> Result<String, String> {
    let mut missing = None;
    let replaced = PLACEHOLDER_RE.replace_all(input, |cap: &regex::Captures| {
        let name = &cap[1];
        match fields.0.get(name) {
            Some(serde_yaml::Value::String(s)) => s.clone(),
            Some(serde_yaml::Value::Sequence(_)) | Some(serde_yaml::Value::Mapping(_)) => {
                let value = fields.0.get(name).unwrap();
                serde_json_like(value)
            }
            Some(other) => match other {
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                _ => String::new(),
            },
            None => {
                missing = Some(name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(name),
        None => Ok(replaced.into_owned()),
    }
}

/// Substitute every `{{NAME}}` placeholder in `input` against `fields`,
/// for use outside the config layer (`MakeFiles` expanding template file
/// contents against a model's already-expanded field document).
pub fn expand_string(input: &str, fields: &ModelFields) -> Result<String, InterpolationError> {
    substitute_once(input, fields).map_err(|name| InterpolationError::UnresolvedPlaceholder {
        field: "<file>".to_string(),
        name,
    })
}

/// Render a YAML list/map value as compact JSON for substitution into a
/// non-string placeholder.
fn serde_json_like(value: &serde_yaml::Value) -> String {
    let as_json: serde_json::Value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
    serde_json::to_string(&as_json).unwrap_or_default()
}

/// Expand every string field of `fields` against itself, recursing to a
/// fixed point: repeat whole-document substitution until no field changes
/// value, or until `MAX_PASSES` is exceeded, treated as a cyclic
/// placeholder reference.
pub fn expand_fixed_point(fields: &ModelFields) -> Result<ModelFields, InterpolationError> {
    let mut current = fields.clone();

    for pass in 0..MAX_PASSES {
        let mut next = current.clone();
        let mut changed = false;

        for (key, value) in current.0.iter() {
            let serde_yaml::Value::String(s) = value else {
                continue;
            };
            if !PLACEHOLDER_RE.is_match(s) {
                continue;
            }
            let resolved = substitute_once(s, &current).map_err(|name| {
                InterpolationError::UnresolvedPlaceholder {
                    field: key.clone(),
                    name,
                }
            })?;
            if &resolved != s {
                changed = true;
            }
            next.0.insert(key.clone(), serde_yaml::Value::String(resolved));
        }

        let has_remaining = next
            .0
            .values()
            .any(|v| matches!(v, serde_yaml::Value::String(s) if PLACEHOLDER_RE.is_match(s)));

        current = next;

        if !has_remaining {
            return Ok(current);
        }
        if !changed {
            return Err(InterpolationError::NotConverging {
                field: "<document>".to_string(),
                passes: pass + 1,
            });
        }
    }

    Err(InterpolationError::NotConverging {
        field: "<document>".to_string(),
        passes: MAX_PASSES,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn fields(pairs: &[(&str, &str)]) -> ModelFields {
        let mut map = BTreeMap::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), serde_yaml::Value::String(v.to_string()));
        }
        ModelFields(map)
    }

    #[test]
    fn expands_single_placeholder() {
        let input = fields(&[("DOCKER_REGISTRY", "reg.example.com"), ("TAG", "{{DOCKER_REGISTRY}}/x")]);
        let out = expand_fixed_point(&input).unwrap();
        assert_eq!(out.get_str("TAG").unwrap(), "reg.example.com/x");
    }

    #[test]
    fn expands_chained_placeholder_transitively() {
        // KUBER_IMAGE_TAG references fields that are themselves plain values.
        let input = fields(&[
            ("DOCKER_REGISTRY", "reg.example.com"),
            ("PREFIX", "stand"),
            ("MODEL_NAME", "ner_ru"),
            (
                "KUBER_IMAGE_TAG",
                "{{DOCKER_REGISTRY}}/{{PREFIX}}/{{MODEL_NAME}}",
            ),
        ]);
        let out = expand_fixed_point(&input).unwrap();
        assert_eq!(
            out.get_str("KUBER_IMAGE_TAG").unwrap(),
            "reg.example.com/stand/ner_ru"
        );
    }

    #[test]
    fn no_placeholders_is_noop() {
        let input = fields(&[("NAME", "plain")]);
        let out = expand_fixed_point(&input).unwrap();
        assert_eq!(out.get_str("NAME").unwrap(), "plain");
    }

    #[test]
    fn unresolved_placeholder_is_an_error() {
        let input = fields(&[("TAG", "{{MISSING}}")]);
        let err = expand_fixed_point(&input).unwrap_err();
        assert!(matches!(err, InterpolationError::UnresolvedPlaceholder { .. }));
    }

    #[test]
    fn cyclic_reference_does_not_converge() {
        let input = fields(&[("A", "{{B}}"), ("B", "{{A}}")]);
        let err = expand_fixed_point(&input).unwrap_err();
        assert!(matches!(err, InterpolationError::NotConverging { .. }));
    }

    #[test]
    fn idempotent_on_already_expanded_document() {
        let input = fields(&[("NAME", "reg.example.com/stand/ner_ru")]);
        let once = expand_fixed_point(&input).unwrap();
        let twice = expand_fixed_point(&once).unwrap();
        assert_eq!(once.get_str("NAME"), twice.get_str("NAME"));
    }
}
