use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::infra::{
    config::{file_config::FileConfig, AppConfig},
    error::AppError,
};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

const ENV_SUPABASE_URL: &str = "CARENAV_SUPABASE_URL";
const ENV_SUPABASE_ANON_KEY: &str = "CARENAV_SUPABASE_ANON_KEY";
const ENV_ACCESS_TOKEN: &str = "CARENAV_ACCESS_TOKEN";
const ENV_ACTOR_ID: &str = "CARENAV_ACTOR_ID";

/// Defaults, then the config file (when present), then environment overrides.
pub fn load(path: Option<&Path>) -> Result<AppConfig, AppError> {
    let mut config = load_file(path)?;
    apply_env_overrides(&mut config, |name| env::var(name).ok());
    Ok(config)
}

fn load_file(path: Option<&Path>) -> Result<AppConfig, AppError> {
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = AppConfig::default();

    if !config_path.exists() {
        return Ok(config);
    }

    let raw = fs::read_to_string(&config_path).map_err(|source| AppError::ConfigRead {
        path: config_path.clone(),
        source,
    })?;

    let file_config: FileConfig = toml::from_str(&raw).map_err(|source| AppError::ConfigParse {
        path: config_path,
        source,
    })?;

    file_config.merge_into(&mut config);
    Ok(config)
}

fn apply_env_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

    if let Some(url) = non_empty(ENV_SUPABASE_URL) {
        config.supabase.url = url;
    }
    if let Some(anon_key) = non_empty(ENV_SUPABASE_ANON_KEY) {
        config.supabase.anon_key = anon_key;
    }
    if let Some(token) = non_empty(ENV_ACCESS_TOKEN) {
        config.supabase.access_token = Some(token);
    }
    if let Some(actor_id) = non_empty(ENV_ACTOR_ID) {
        config.actor.id = actor_id;
    }
}
