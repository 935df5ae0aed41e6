use std::path::PathBuf;

use crate::config::{Config, StoreConfig};

const APIARY_CONFIG: &str = "APIARY_CONFIG";

const DEFAULT_CONFIG: &str = "apiary.json";

/// Config file path: the explicit argument, then `APIARY_CONFIG`, then `apiary.json`
pub fn get_config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var(APIARY_CONFIG).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG))
}

const APIARY_STORE_KEY: &str = "APIARY_STORE_KEY";

pub fn get_store_key() -> Option<String> {
    std::env::var(APIARY_STORE_KEY)
        .ok()
        .filter(|key| !key.is_empty())
}

/// Keep secrets out of config files: the store key from the environment wins
pub fn apply_env_overrides(config: &mut Config) {
    if let (StoreConfig::Rest(rest), Some(key)) = (&mut config.store, get_store_key()) {
        rest.api_key = Some(key);
    }
}
