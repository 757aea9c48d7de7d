//! Loader for `dvc.yaml`-style pipeline documents.
//!
//! Only concrete stages are accepted. Templated forms (`foreach`, `matrix`)
//! must be expanded by whatever produced the document.

use super::StageSpec;
use crate::errors::ConfigurationError;
use serde_yaml::{Mapping, Value};
use std::path::Path;
use tracing::debug;

const TEMPLATED_KEYS: &[&str] = &["foreach", "matrix", "do"];

/// Reads and parses a pipeline definition file.
///
/// # Errors
///
/// Returns an error if the file is missing, is not valid YAML, or any
/// stage is malformed.
pub fn load_pipeline(path: &Path) -> Result<Vec<StageSpec>, ConfigurationError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ConfigurationError::new(format!(
            "Cannot read pipeline definition {}: {e}",
            path.display()
        ))
    })?;
    let stages = parse_pipeline(&text)?;
    debug!(path = %path.display(), stages = stages.len(), "Loaded pipeline definition");
    Ok(stages)
}

/// Parses a pipeline definition from YAML text.
///
/// Stages are returned in document order.
///
/// # Errors
///
/// Returns an error if the document has no `stages` mapping or a stage is
/// malformed.
pub fn parse_pipeline(text: &str) -> Result<Vec<StageSpec>, ConfigurationError> {
    let doc: Value = serde_yaml::from_str(text)
        .map_err(|e| ConfigurationError::new(format!("Malformed pipeline definition: {e}")))?;

    let stages = doc
        .get("stages")
        .and_then(Value::as_mapping)
        .ok_or_else(|| ConfigurationError::new("Pipeline definition must contain a 'stages' section"))?;

    stages
        .iter()
        .map(|(name, config)| {
            let name = name
                .as_str()
                .ok_or_else(|| ConfigurationError::new("Stage names must be strings"))?;
            parse_stage(name, config)
        })
        .collect()
}

fn parse_stage(name: &str, config: &Value) -> Result<StageSpec, ConfigurationError> {
    let config = config.as_mapping().ok_or_else(|| {
        ConfigurationError::new(format!("Stage '{name}' must be a mapping"))
            .with_stages(vec![name.to_string()])
    })?;

    if let Some(key) = TEMPLATED_KEYS.iter().find(|k| config.contains_key(**k)) {
        return Err(ConfigurationError::new(format!(
            "Stage '{name}' uses templated form '{key}'; expand it before loading"
        ))
        .with_stages(vec![name.to_string()]));
    }

    let cmd = match config.get("cmd") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Sequence(parts)) => parts
            .iter()
            .map(|p| scalar_string(p).ok_or_else(|| field_error(name, "cmd")))
            .collect::<Result<Vec<_>, _>>()?
            .join(" && "),
        Some(_) => return Err(field_error(name, "cmd")),
        None => {
            return Err(ConfigurationError::new(format!(
                "Stage '{name}' missing required 'cmd' field"
            ))
            .with_stages(vec![name.to_string()]))
        }
    };

    let spec = StageSpec {
        name: name.to_string(),
        cmd,
        deps: path_list(name, "deps", config)?,
        outs: path_list(name, "outs", config)?,
        after: path_list(name, "after", config)?,
        desc: config.get("desc").and_then(scalar_string),
    };
    spec.validate()?;
    Ok(spec)
}

/// Accepts a single string, a list, or a mapping whose values are used.
///
/// List items may themselves be single-key mappings (`- model.pkl: {cache: false}`),
/// in which case the key is the path.
fn path_list(stage: &str, field: &str, config: &Mapping) -> Result<Vec<String>, ConfigurationError> {
    let Some(value) = config.get(field) else {
        return Ok(Vec::new());
    };

    let mut paths = Vec::new();
    match value {
        Value::Null => {}
        Value::Sequence(items) => {
            for item in items {
                match item {
                    Value::Mapping(m) if m.len() == 1 => {
                        let key = m.keys().next().and_then(scalar_string);
                        paths.push(key.ok_or_else(|| field_error(stage, field))?);
                    }
                    other => paths.push(scalar_string(other).ok_or_else(|| field_error(stage, field))?),
                }
            }
        }
        Value::Mapping(m) => {
            for v in m.values() {
                match v {
                    Value::Sequence(items) => {
                        for item in items {
                            paths.push(scalar_string(item).ok_or_else(|| field_error(stage, field))?);
                        }
                    }
                    other => paths.push(scalar_string(other).ok_or_else(|| field_error(stage, field))?),
                }
            }
        }
        other => paths.push(scalar_string(other).ok_or_else(|| field_error(stage, field))?),
    }
    Ok(paths)
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn field_error(stage: &str, field: &str) -> ConfigurationError {
    ConfigurationError::new(format!("Stage '{stage}' has an invalid '{field}' field"))
        .with_stages(vec![stage.to_string()])
}
