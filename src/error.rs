// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Failures while logging in to moodle or downloading the plan document.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("moodle login failed with status {status}")]
    Login { status: u16 },

    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("writing document to {path:?} failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures of the external table-extraction tool or of reading its output.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("could not start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("extractor exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("reading extracted table {path:?} failed: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV from extractor: {0}")]
    Csv(#[from] csv::Error),
}

/// A failed fetch/extract cycle. Nothing is cached when this is returned.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("user registry I/O on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("user registry {path:?} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("user {0} is not registered")]
    NotRegistered(String),

    #[error("user {0} is not an admin")]
    NotAdmin(String),

    #[error("unknown user {0}")]
    UnknownUser(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config {path:?} failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config {path:?} is not valid YAML: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("missing required setting `{0}`")]
    Missing(&'static str),
}
