mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./config.toml",
        "./ringcast.toml",
        "~/.config/ringcast/config.toml",
        "/etc/ringcast/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }
    if config.server.workers == 0 {
        anyhow::bail!("Worker count cannot be 0");
    }
    if config.server.max_sessions == 0 {
        anyhow::bail!("Session slot count cannot be 0");
    }
    if config.cache.capacity < 1024 {
        anyhow::bail!(
            "Cache capacity {} is too small to hold encoder output",
            config.cache.capacity
        );
    }

    for job in &config.jobs {
        if job.name.is_empty() || job.name.contains('/') {
            anyhow::bail!("Invalid job name: {:?}", job.name);
        }
        if job.streams.is_empty() {
            anyhow::bail!("Job '{}' has no streams", job.name);
        }
        for stream in &job.streams {
            if stream.name.is_empty() || stream.name.contains('/') {
                anyhow::bail!("Invalid stream name {:?} in job '{}'", stream.name, job.name);
            }
        }
    }

    Ok(())
}
