use crate::config::IngestorConfig;
use crate::errors::IngestResult;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "ingestor.toml";
pub const CONFIG_PATH_ENV: &str = "INGESTOR_CONFIG";
pub const ENV_PREFIX: &str = "INGESTOR_";

/// Resolve the TOML file to read: explicit path, then `INGESTOR_CONFIG`,
/// then `ingestor.toml` in the working directory.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Defaults, then the TOML file, then `INGESTOR_*` environment variables.
/// Nested keys use `__`, e.g. `INGESTOR_DELIVERY__MODE=retain`.
pub fn figment(path: &Path) -> Figment {
    Figment::from(Serialized::defaults(IngestorConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]).split("__"))
}

pub fn load_config(explicit: Option<&Path>) -> IngestResult<IngestorConfig> {
    extract(figment(&config_path(explicit)))
}

/// Extract and validate a configuration from any figment.
pub fn extract(figment: Figment) -> IngestResult<IngestorConfig> {
    let config: IngestorConfig = figment.extract()?;
    config.validate()?;
    Ok(config)
}
