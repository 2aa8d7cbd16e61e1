//! Declarative configuration for the director daemon: YAML types, the
//! loader (env substitution + include merging), and semantic validation.

pub mod loader;
pub mod types;
pub mod validate;

use std::path::PathBuf;

pub use loader::load;
pub use types::*;
pub use validate::validate;

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("missing environment variables: {0:?}")]
    MissingEnv(Vec<String>),

    #[error("invalid include pattern: {0}")]
    Include(#[from] glob::PatternError),

    #[error("main config must not define services; define services in included files")]
    ServicesInMainFile,

    #[error("service config file {0} must contain only 'services'")]
    ServiceFileShape(PathBuf),

    #[error("invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
