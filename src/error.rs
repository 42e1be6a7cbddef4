use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("Incorrect major version: {0}")]
    IncorrectMajor(String),

    #[error("Incorrect minor version: {0}")]
    IncorrectMinor(String),

    #[error("Incorrect patch version: {0}")]
    IncorrectPatch(String),

    #[error("Incorrect build number: {0}")]
    IncorrectBuild(String),

    #[error("Missing major version")]
    MissingMajor,

    #[error("Missing minor version")]
    MissingMinor,

    #[error("Missing patch version")]
    MissingPatch,

    #[error("Missing build number")]
    MissingBuild,

    #[error("Too many components")]
    ExtraComponents,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed to write config {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("Malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Failed to fetch download feed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected download feed format: {0}")]
    FeedFormat(String),

    #[error("No server package for platform {0}")]
    UnknownPlatform(String),
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Failed to download server package: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Failed to extract {path}: {source}")]
    Extraction { path: PathBuf, source: io::Error },

    #[error("Unreadable server package: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Archive entry escapes the install directory: {0}")]
    UnsafeEntry(String),

    #[error("Extraction worker failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl UpdateError {
    pub(crate) fn extraction(path: impl Into<PathBuf>, source: io::Error) -> Self {
        UpdateError::Extraction {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Server is already running")]
    AlreadyRunning,

    #[error("Server is not running")]
    NotRunning,

    #[error("Server process has already exited")]
    Finished,

    #[error("Failed to launch {path}: {source}")]
    Launch { path: PathBuf, source: io::Error },

    #[error("Failed to access child stdout pipe")]
    NoStdoutPipe,

    #[error("Failed to access child stdin pipe")]
    NoStdinPipe,

    #[error("Failed to access child stderr pipe")]
    NoStderrPipe,

    #[error("Failed to write to stdin")]
    StdinWriteFailed,

    #[error("Failed to wait for server process: {0}")]
    Wait(io::Error),
}
