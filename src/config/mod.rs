pub mod generate;
pub mod parse;
pub mod types;

use regex::Regex;
use std::path::{Path, PathBuf};

pub use parse::{load_config, parse_config, ConfigError};
pub use types::{
    Config, PersistenceFailurePolicy, PipelineConfig, ReportConfig, StorageConfig, WatcherConfig,
    WebConfig,
};

const USER_CONFIG: &str = ".config/telemetry-ingest/config.yml";
const SYSTEM_CONFIG: &str = "/etc/telemetry-ingest/config.yml";

/// Expands environment variables in a string.
/// Supports $env{VAR_NAME} syntax.
/// If an environment variable is not set, it's left unchanged.
pub fn expand_env_vars(text: &str) -> String {
    let Ok(re) = Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}") else {
        return text.to_string();
    };

    re.replace_all(text, |caps: &regex::Captures| {
        let whole = &caps[0];
        std::env::var(&caps[1]).unwrap_or_else(|_| whole.to_string())
    })
    .to_string()
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    } else if path_str == "~" {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir;
        }
    }

    path.to_path_buf()
}

/// Resolves the config file path based on explicit argument or default locations.
/// Returns the first existing path from:
/// 1. Explicit path (if provided, with tilde expansion)
/// 2. ~/.config/telemetry-ingest/config.yml
/// 3. /etc/telemetry-ingest/config.yml
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }

    if let Some(home_dir) = dirs::home_dir() {
        let user_config = home_dir.join(USER_CONFIG);
        if user_config.exists() {
            return Some(user_config);
        }
    }

    let system_config = PathBuf::from(SYSTEM_CONFIG);
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Where `config init` writes when no explicit location is requested.
pub fn default_user_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(USER_CONFIG))
}

pub fn system_config_path() -> PathBuf {
    PathBuf::from(SYSTEM_CONFIG)
}
