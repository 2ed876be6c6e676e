//! `.env` reader. Values are returned as a map; `lib.rs` decides what reaches the environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

fn dotenv_path(override_dir: Option<&Path>) -> Option<PathBuf> {
    let dir = match override_dir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().ok()?,
    };
    let path = dir.join(".env");
    path.is_file().then_some(path)
}

/// One `KEY=VALUE` per line.
///
/// Blank lines and `#` comment lines are skipped, as is an optional leading `export `.
/// Double-quoted values unescape `\"`; single-quoted values are taken literally.
fn parse(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), unquote(value.trim())))
        })
        .collect()
}

fn unquote(value: &str) -> String {
    if let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    {
        return inner.replace("\\\"", "\"");
    }
    if let Some(inner) = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
    {
        return inner.to_string();
    }
    value.to_string()
}

/// Reads `.env` from `override_dir` or the current directory. A missing file yields an empty map.
pub fn load_env_map(override_dir: Option<&Path>) -> std::io::Result<HashMap<String, String>> {
    match dotenv_path(override_dir) {
        Some(path) => Ok(parse(&std::fs::read_to_string(path)?)),
        None => Ok(HashMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs_and_skips_noise() {
        let m = parse("\n# retries\nGAUNTLET_MAX_RETRIES=4\n  \nNOT_A_PAIR\n=orphan\n");
        assert_eq!(m.get("GAUNTLET_MAX_RETRIES").map(String::as_str), Some("4"));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn export_prefix_is_accepted() {
        let m = parse("export RUST_LOG=gauntlet=debug\n");
        assert_eq!(m.get("RUST_LOG").map(String::as_str), Some("gauntlet=debug"));
    }

    #[test]
    fn quoting_rules() {
        let m = parse(
            "A=\"two words\"\nB='it''s literal'\nC=\"say \\\"hi\\\"\"\nD=\"\"\nE=\nF=x#y\n",
        );
        assert_eq!(m["A"], "two words");
        assert_eq!(m["B"], "it''s literal");
        assert_eq!(m["C"], "say \"hi\"");
        assert_eq!(m["D"], "");
        assert_eq!(m["E"], "");
        assert_eq!(m["F"], "x#y");
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_env_map(Some(dir.path())).unwrap().is_empty());
    }

    #[test]
    fn reads_file_from_override_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "GAUNTLET_DB=runs.sqlite\n").unwrap();
        let m = load_env_map(Some(dir.path())).unwrap();
        assert_eq!(m["GAUNTLET_DB"], "runs.sqlite");
    }
}
