//! Configuration loading: env-var substitution, main-file shape rules, and
//! the `include` glob merge for service files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_yaml::Value;
use tracing::debug;

use crate::types::{Config, ServiceFile};
use crate::ConfigError;

/// Matches `${VAR_NAME}` references.
fn env_var_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Z0-9_]+)\}").expect("env var pattern"))
}

/// Load the configuration from `path`, merging services from included files.
///
/// The returned config is *not* validated; callers run
/// [`crate::validate::validate`] before using it.
pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let resolved = resolve_env_vars(&raw)?;

    // The main file defines globals only.
    let top: Value = serde_yaml::from_str(&resolved)?;
    if top.get("services").is_some() {
        return Err(ConfigError::ServicesInMainFile);
    }

    let mut cfg: Config = serde_yaml::from_str(&resolved)?;

    if !cfg.include.is_empty() {
        let pattern = resolve_include_pattern(path, &cfg.include);
        let mut matches: Vec<PathBuf> = glob::glob(&pattern)?
            .filter_map(|entry| entry.ok())
            .collect();
        matches.sort();
        debug!(pattern = %pattern, files = matches.len(), "resolved include pattern");

        for file in &matches {
            load_service_file(file, &mut cfg)?;
        }
    }

    Ok(cfg)
}

/// Include patterns are resolved relative to the main config file.
fn resolve_include_pattern(config_path: &Path, include: &str) -> String {
    let include_path = Path::new(include);
    if include_path.is_absolute() {
        return include.to_string();
    }
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(include_path)
        .to_string_lossy()
        .into_owned()
}

/// Load one included file and append its services. Included files must
/// contain only the `services` key at the top level.
fn load_service_file(path: &Path, cfg: &mut Config) -> Result<(), ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let resolved = resolve_env_vars(&raw)?;

    let top: Value = serde_yaml::from_str(&resolved)?;
    match &top {
        Value::Null => return Ok(()),
        Value::Mapping(map) => {
            if map.len() != 1 || top.get("services").is_none() {
                return Err(ConfigError::ServiceFileShape(path.to_path_buf()));
            }
        }
        _ => return Err(ConfigError::ServiceFileShape(path.to_path_buf())),
    }

    let file: ServiceFile = serde_yaml::from_str(&resolved)?;
    if !file.services.is_empty() {
        debug!(path = %path.display(), count = file.services.len(), "merged service file");
        cfg.services.extend(file.services);
    }
    Ok(())
}

/// Replace every `${VAR}` with the value of the environment variable. The
/// load fails if any referenced variable is unset.
pub fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = env_var_regex();

    let mut missing: Vec<String> = Vec::new();
    for caps in re.captures_iter(input) {
        let name = &caps[1];
        if std::env::var_os(name).is_none() && !missing.iter().any(|m| m == name) {
            missing.push(name.to_string());
        }
    }
    if !missing.is_empty() {
        return Err(ConfigError::MissingEnv(missing));
    }

    let resolved = re.replace_all(input, |caps: &Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    });
    Ok(resolved.into_owned())
}
