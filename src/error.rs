use std::io;
use thiserror::Error;

/// Errors raised by the download pipeline.
///
/// Everything that can go wrong inside a job lands here so that the worker
/// pools can log it and move on. Startup code in `main.rs` wraps these in
/// `anyhow` with extra context.
#[derive(Error, Debug)]
pub enum Error {
    /// The catalog rejected our credentials or session token.
    #[error("authentication rejected by {store}: {message}")]
    Auth { store: String, message: String },

    /// The catalog is throttling this account.
    #[error("rate limited by {store}")]
    RateLimited { store: String },

    #[error("unexpected HTTP status {status} from {url}")]
    Api { status: u16, url: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cancelled by shutdown")]
    Cancelled,

    #[error("no usable account could be loaded")]
    NoAccounts,

    /// Some of the files behind one URL could not be downloaded.
    #[error("{failed} of {total} downloads failed")]
    Job { failed: usize, total: usize },
}

impl Error {
    /// Whether this failure should make the caller switch to another account.
    ///
    /// Only session problems and throttling qualify; network hiccups and
    /// missing items would fail the same way on every account.
    pub fn needs_failover(&self) -> bool {
        matches!(self, Error::Auth { .. } | Error::RateLimited { .. })
    }

    pub(crate) fn invalid_url(url: &str, reason: impl Into<String>) -> Self {
        Error::InvalidUrl {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
