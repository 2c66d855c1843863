use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by caller-supplied identifier and filter functions.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("directory walk: {0}")]
    Walk(#[from] walkdir::Error),

    /// The document (or the record type's serialized form) is not a mapping.
    #[error("{path:?}: config document is not a mapping")]
    Shape { path: PathBuf },

    /// A target version is configured but the file carries no recognizable
    /// top-level `version:` line. A missing line is never defaulted.
    #[error("{path:?}: no top-level `version:` line found")]
    VersionMissing { path: PathBuf },

    /// Attempted to access a configuration type before it was registered.
    ///
    /// Returned by [`ConfigRegistry::get`](crate::ConfigRegistry::get),
    /// [`ConfigRegistry::reload`](crate::ConfigRegistry::reload), and
    /// [`ConfigRegistry::save`](crate::ConfigRegistry::save). Callers that
    /// cannot guarantee registration order should await
    /// [`ConfigRegistry::on_init`](crate::ConfigRegistry::on_init) instead.
    /// The contained string is the type name of the missing config.
    #[error("config not registered: {0}")]
    NotRegistered(&'static str),

    /// A caller-supplied identifier or filter failed while scanning `path`.
    #[error("{path:?}: {source}")]
    Callback { path: PathBuf, source: BoxedError },
}
