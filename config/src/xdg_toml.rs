//! Read `$XDG_CONFIG_HOME/<app>/config.toml`: the `[env]` table and named sections.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::LoadError;

/// `$XDG_CONFIG_HOME` when set, else the platform config dir.
fn config_home() -> Result<PathBuf, LoadError> {
    match std::env::var_os("XDG_CONFIG_HOME") {
        Some(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => dirs::config_dir()
            .ok_or_else(|| LoadError::XdgPath("no config directory for this platform".into())),
    }
}

/// Path of the app's config file if it exists.
pub fn config_path(app_name: &str) -> Result<Option<PathBuf>, LoadError> {
    let path = config_home()?.join(app_name).join("config.toml");
    Ok(path.is_file().then_some(path))
}

fn load_document(app_name: &str) -> Result<Option<toml::Table>, LoadError> {
    let path = match config_path(app_name)? {
        Some(p) => p,
        None => return Ok(None),
    };
    let content = std::fs::read_to_string(&path).map_err(LoadError::XdgRead)?;
    Ok(Some(toml::from_str(&content)?))
}

/// Returns key-value pairs from the `[env]` table. Missing file or table returns an empty map.
pub fn load_env_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    let env = match load_document(app_name)?.and_then(|mut doc| doc.remove("env")) {
        Some(v) => v,
        None => return Ok(HashMap::new()),
    };
    Ok(env.try_into::<HashMap<String, String>>()?)
}

/// Returns the raw `[section]` table, if present.
pub fn load_table(app_name: &str, section: &str) -> Result<Option<toml::Value>, LoadError> {
    Ok(load_document(app_name)?.and_then(|mut doc| doc.remove(section)))
}
