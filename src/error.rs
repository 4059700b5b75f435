//! Error types for the playlist downloader

use thiserror::Error;

use crate::validation::UrlError;

/// Result type alias for downloader operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
///
/// Job outcomes are not errors: a finished download is reported as an
/// [`Outcome`](crate::model::Outcome). These variants cover everything that
/// prevents a fetch or a job from running in the first place, plus the
/// generic external-tool failure a caller may want to propagate.
#[derive(Debug, Error)]
pub enum Error {
    /// The external executable could not be resolved on the search path
    ///
    /// Reported separately from every other failure: the fix is to install
    /// the tool, not to retry the download.
    #[error("{tool} was not found on the search path; install it and make sure it is on PATH")]
    ToolNotFound {
        /// Name or path of the executable that was looked up
        tool: String,
    },

    /// The executable exists but does not run correctly
    #[error("{tool} is installed but seems to be broken: {message}")]
    ToolBroken {
        /// Name or path of the executable
        tool: String,
        /// What went wrong when running it
        message: String,
    },

    /// URL rejected by the local check before anything was started
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] UrlError),

    /// A job was started without an identifier
    #[error("job identifier must not be empty")]
    EmptyIdentifier,

    /// The external tool ran but failed (network trouble, unavailable or
    /// unsupported content, truncated output)
    #[error("{message}")]
    NetworkOrSource {
        /// Message taken from the tool's output
        message: String,
    },

    /// The listing succeeded but contained no usable entries
    #[error("no videos found in playlist or invalid URL")]
    EmptyPlaylist,

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "tracker.tail_capacity")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Map a process spawn error, singling out a missing executable
    pub(crate) fn from_spawn(err: std::io::Error, tool: impl Into<String>) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Error::ToolNotFound { tool: tool.into() }
        } else {
            Error::Io(err)
        }
    }

    /// Whether this error means the tool has to be installed first
    pub fn is_tool_not_found(&self) -> bool {
        matches!(self, Error::ToolNotFound { .. })
    }
}
