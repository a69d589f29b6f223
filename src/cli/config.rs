use crate::config::{default_user_config_path, generate::generate_starter_config, system_config_path};
use std::fs;
use std::path::{Path, PathBuf};

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();

    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    let config_path = user_config_target().unwrap_or_else(|| {
        eprintln!("Falling back to {}", system_config_path().display());
        system_config_path()
    });

    write_config(&config_content, &config_path)?;
    println!("Config file written to {}", config_path.display());
    Ok(())
}

/// `~/.config/telemetry-ingest/config.yml` if its directory can be created.
fn user_config_target() -> Option<PathBuf> {
    let user_config = default_user_config_path()?;
    let parent = user_config.parent()?;
    match fs::create_dir_all(parent) {
        Ok(()) => Some(user_config),
        Err(e) => {
            eprintln!("Warning: Could not create directory {}: {}", parent.display(), e);
            None
        }
    }
}

/// Write a config file, refusing to replace an existing one.
pub fn write_config(config_content: &str, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        return Err(format!(
            "Config file already exists at {}. Remove it first or use --stdout to print the config",
            path.display()
        )
        .into());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, config_content)?;
    Ok(())
}

pub fn validate(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path.ok_or("No config file found. Use --config to specify a path.")?;

    println!("Validating config file: {}", path.display());
    crate::config::load_config(&path)?;
    println!("✓ Config is valid");
    Ok(())
}
