use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which remote resource a network request was for. Carried inside
/// [`Error::Network`] so a failure names the thing that was being fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Manifest,
    Segment,
    Key,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Manifest => f.write_str("manifest"),
            Resource::Segment => f.write_str("segment"),
            Resource::Key => f.write_str("key"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed URL, wrong argument shape, or a relative URI with no base
    /// to resolve it against.
    #[error("invalid input: {0}")]
    InputValidation(String),

    /// Transport-level failure while fetching a manifest, segment or key.
    #[error("{resource} request to {url} failed: {source}")]
    Network {
        resource: Resource,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("filesystem error at {path}: {source}")]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Bad key/IV length or PKCS#7 padding validation failure.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// The media tool exited nonzero or its diagnostics matched a known
    /// failure phrase.
    #[error("media tool failure: {0}")]
    ExternalTool(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn network(resource: Resource, url: &url::Url, source: reqwest::Error) -> Self {
        Error::Network {
            resource,
            url: url.to_string(),
            source,
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::FileSystem {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
