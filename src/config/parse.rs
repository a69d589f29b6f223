use super::types::*;
use crate::config::{expand_env_vars, expand_tilde};
use regex::Regex;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(err) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), err),
        )),
        other => other,
    })
}

/// Parse and validate a config from a YAML string.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    // Expand environment variables in the YAML string before parsing
    let yaml_string = expand_env_vars(yaml);

    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;

    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error.
///
/// Comment lines are skipped; only values can leave a variable unresolved.
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    let mut unexpanded_vars: Vec<String> = yaml_string
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .flat_map(|line| re.captures_iter(line))
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=/path/to/directory\n\
             2. Replace $env{{{0}}} in the config file with an actual path",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables (e.g., export INGEST_ROOT=/srv/ingest)\n\
             2. Replace the variables in the config file with actual paths",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

/// Expands tilde (~) in all PathBuf fields in the config.
fn expand_paths(config: &mut Config) {
    config.watcher.input_dir = expand_tilde(&config.watcher.input_dir);
    config.watcher.output_dir = expand_tilde(&config.watcher.output_dir);
    config.storage.path = expand_tilde(&config.storage.path);
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();
    let watcher = &config.watcher;

    if watcher.workers == 0 {
        errors.push("watcher.workers must be at least 1".to_string());
    }

    if watcher.queue_capacity == 0 {
        errors.push("watcher.queue_capacity must be at least 1".to_string());
    }

    if watcher.poll_interval.is_zero() {
        errors.push("watcher.poll_interval must be greater than zero".to_string());
    }

    if watcher.extension.is_empty() {
        errors.push("watcher.extension must not be empty".to_string());
    } else if watcher.extension.starts_with('.') {
        errors.push(format!(
            "watcher.extension '{}' must not start with '.'",
            watcher.extension
        ));
    }

    if watcher.input_dir == watcher.output_dir {
        errors.push(format!(
            "watcher.input_dir and watcher.output_dir must differ (both are '{}')",
            watcher.input_dir.display()
        ));
    }

    if config.reports.max_records == 0 {
        errors.push("reports.max_records must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}
