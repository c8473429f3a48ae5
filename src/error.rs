//! Crate-wide error taxonomy and exit-code mapping.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by protoforge operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed configuration or missing required fields.
    #[error("config error: {0}")]
    Config(String),

    /// One or more non-optional dependencies failed after attempting all of them.
    #[error("failed to resolve {} dependencies: {}", .0.len(), .0.join(", "))]
    FailedDeps(Vec<String>),

    /// Vendoring I/O failure, with path and dependency context.
    #[error("failed to copy {path} (dependency {name}): {source}")]
    Copy {
        path: PathBuf,
        name: String,
        #[source]
        source: io::Error,
    },

    /// protoc (or the retag pass) exited non-zero.
    #[error("protoc exited with status {status}: {command}")]
    Build { command: String, status: i32 },

    /// Code generation failed in one or more source directories.
    #[error("code generation failed for: {}", .0.join(", "))]
    FailedDirs(Vec<String>),

    /// Plugin bridge failure: malformed request or wrapper subprocess error.
    #[error("plugin bridge: {0}")]
    Bridge(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Process exit code this error maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) | Error::Yaml(_) => 2,
            _ => 1,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
