//! Error taxonomy for the acquisition pipeline.
//!
//! Each component owns one error enum. Only [`AuthError`] and [`ConfigError`]
//! end the process; everything else is caught at the issue boundary by the
//! archive walker and logged with the issue key attached.

use std::path::PathBuf;
use thiserror::Error;

/// Login protocol or session persistence failure. Always fatal.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Network failure or non-success status during the login exchange.
    #[error("login request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The login endpoint answered with something we cannot interpret.
    #[error("unexpected login response: {0}")]
    Protocol(String),

    /// The cookie store could not be written.
    #[error("failed to persist session to {path}: {reason}")]
    Persist { path: PathBuf, reason: String },

    /// The cookie store on disk could not be read back.
    #[error("failed to restore session from {path}: {reason}")]
    Restore { path: PathBuf, reason: String },

    /// The HTTP client could not be constructed.
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
}

/// A fetch that could not produce its destination file.
///
/// A confirmed 404 is not an error; see [`crate::fetch::FetchOutcome::NotFound`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// Every attempt failed with a transient (non-404) error.
    #[error("giving up on {url} after {attempts} attempts: {source}")]
    Exhausted {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    /// Writing the response body to disk failed on the final attempt.
    #[error("failed writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The body kept arriving smaller than the plausibility threshold.
    #[error("{url} stayed below {min_bytes} bytes after {attempts} attempts")]
    Integrity {
        url: String,
        attempts: u32,
        min_bytes: u64,
    },
}

/// Rendering or merging failure. Abandons the current issue only.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("rendering {url} failed: {reason}")]
    Render { url: String, reason: String },

    #[error("could not start merge tool `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("merge into {output} exited with {status}: {stderr}")]
    Merge {
        output: PathBuf,
        status: String,
        stderr: String,
    },

    #[error("issue index listed no articles")]
    NoArticles,

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Everything that can abandon a single issue.
#[derive(Debug, Error)]
pub enum IssueError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    /// The issue index page could not be retrieved.
    #[error("index page {url} unavailable: {source}")]
    Index {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid article pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// The whole-issue document itself answered 404 after a good probe.
    #[error("issue document {url} not found")]
    DocumentMissing { url: String },
}

/// Startup configuration problems. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing credential: set the {0} environment variable")]
    MissingCredential(&'static str),

    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("end year {end} is before start year {start}")]
    YearRange { start: u16, end: u16 },
}
