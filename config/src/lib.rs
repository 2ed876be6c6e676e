//! Load configuration from XDG `config.toml` and project `.env`, then apply to the process
//! environment with priority: **existing env > .env > XDG**.
//!
//! Typed sections of the same `config.toml` (e.g. `[orchestrator]`) are read with
//! [`load_section`]. Binaries can install a tracing subscriber with
//! `tracing_init::init` (feature `tracing-init`).

mod dotenv;
mod xdg_toml;

#[cfg(feature = "tracing-init")]
pub mod tracing_init;

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("xdg config path: {0}")]
    XdgPath(String),
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// Loads config from XDG `config.toml` and optional project `.env`, then sets environment
/// variables only for keys that are **not** already set (so existing env has highest priority).
///
/// Order of precedence when a key is missing in the process environment:
/// 1. Value from project `.env` (current directory or `override_dir` if given)
/// 2. Value from `$XDG_CONFIG_HOME/<app_name>/config.toml` `[env]` table
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let xdg_map = xdg_toml::load_env_map(app_name)?;
    let dotenv_map = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;

    let mut keys: std::collections::BTreeSet<String> = xdg_map.keys().cloned().collect();
    keys.extend(dotenv_map.keys().cloned());

    for key in keys {
        if std::env::var_os(&key).is_some() {
            continue;
        }
        if let Some(v) = dotenv_map.get(&key).or_else(|| xdg_map.get(&key)) {
            std::env::set_var(&key, v);
        }
    }

    Ok(())
}

/// Deserializes `[section]` of the app's `config.toml`; `T::default()` when the file or
/// section is absent. Missing fields fall back to the type's serde defaults.
pub fn load_section<T>(app_name: &str, section: &str) -> Result<T, LoadError>
where
    T: DeserializeOwned + Default,
{
    match xdg_toml::load_table(app_name, section)? {
        Some(value) => Ok(value.try_into()?),
        None => Ok(T::default()),
    }
}

/// Path of `$XDG_CONFIG_HOME/<app_name>/config.toml` if the file exists.
pub fn config_file(app_name: &str) -> Result<Option<PathBuf>, LoadError> {
    xdg_toml::config_path(app_name)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env::with_xdg_home;
    use std::env;

    fn write_xdg(dir: &Path, body: &str) {
        let app_dir = dir.join("gauntlet");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), body).unwrap();
    }

    #[derive(Debug, Default, PartialEq, serde::Deserialize)]
    #[serde(default)]
    struct Limits {
        max_steps: u64,
        label: String,
    }

    #[test]
    fn existing_env_wins() {
        let xdg = tempfile::tempdir().unwrap();
        write_xdg(xdg.path(), "[env]\nGAUNTLET_TEST_EXISTING = \"from_xdg\"\n");
        env::set_var("GAUNTLET_TEST_EXISTING", "from_env");
        let _ = with_xdg_home(xdg.path(), || load_and_apply("gauntlet", Some(xdg.path())));
        assert_eq!(env::var("GAUNTLET_TEST_EXISTING").as_deref(), Ok("from_env"));
        env::remove_var("GAUNTLET_TEST_EXISTING");
    }

    #[test]
    fn dotenv_overrides_xdg() {
        let xdg = tempfile::tempdir().unwrap();
        write_xdg(xdg.path(), "[env]\nGAUNTLET_TEST_PRIORITY = \"from_xdg\"\n");
        let dotenv_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dotenv_dir.path().join(".env"),
            "GAUNTLET_TEST_PRIORITY=from_dotenv\n",
        )
        .unwrap();

        env::remove_var("GAUNTLET_TEST_PRIORITY");
        with_xdg_home(xdg.path(), || load_and_apply("gauntlet", Some(dotenv_dir.path())))
            .unwrap();
        let val = env::var("GAUNTLET_TEST_PRIORITY").unwrap();
        env::remove_var("GAUNTLET_TEST_PRIORITY");
        assert_eq!(val, "from_dotenv");
    }

    #[test]
    fn xdg_applied_when_no_dotenv() {
        let xdg = tempfile::tempdir().unwrap();
        write_xdg(xdg.path(), "[env]\nGAUNTLET_TEST_XDG_ONLY = \"from_xdg\"\n");
        let empty = tempfile::tempdir().unwrap();

        env::remove_var("GAUNTLET_TEST_XDG_ONLY");
        with_xdg_home(xdg.path(), || load_and_apply("gauntlet", Some(empty.path()))).unwrap();
        let val = env::var("GAUNTLET_TEST_XDG_ONLY").unwrap();
        env::remove_var("GAUNTLET_TEST_XDG_ONLY");
        assert_eq!(val, "from_xdg");
    }

    #[test]
    fn load_section_reads_typed_table() {
        let xdg = tempfile::tempdir().unwrap();
        write_xdg(xdg.path(), "[limits]\nmax_steps = 80\n");
        let limits: Limits =
            with_xdg_home(xdg.path(), || load_section("gauntlet", "limits")).unwrap();
        assert_eq!(
            limits,
            Limits {
                max_steps: 80,
                label: String::new()
            }
        );
    }

    #[test]
    fn load_section_defaults_when_absent() {
        let xdg = tempfile::tempdir().unwrap();
        let limits: Limits =
            with_xdg_home(xdg.path(), || load_section("gauntlet", "limits")).unwrap();
        assert_eq!(limits, Limits::default());
    }

    #[test]
    fn load_section_rejects_wrong_types() {
        let xdg = tempfile::tempdir().unwrap();
        write_xdg(xdg.path(), "[limits]\nmax_steps = \"many\"\n");
        let result: Result<Limits, _> =
            with_xdg_home(xdg.path(), || load_section("gauntlet", "limits"));
        assert!(matches!(result, Err(LoadError::XdgParse(_))));
    }
}
