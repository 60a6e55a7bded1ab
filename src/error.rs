//! Error types for vulpo

use thiserror::Error;

/// Result type for vulpo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for vulpo
#[derive(Debug, Error)]
pub enum Error {
    /// A browser session is already running
    #[error("Browser already running. Close it first.")]
    AlreadyRunning,

    /// No browser session is running
    #[error("Browser not running. Launch it first.")]
    NotRunning,

    /// The driver did not finish launching within the configured timeout
    #[error("Browser launch timed out after {timeout_ms}ms")]
    LaunchTimeout { timeout_ms: u64 },

    /// The driver failed to launch the browser
    #[error("Browser launch failed: {0}")]
    LaunchFailure(String),

    /// The page registry is full
    #[error("Maximum page limit ({max_pages}) reached")]
    PageLimitExceeded { max_pages: usize },

    /// No page is registered under the given id
    #[error("Page '{0}' not found")]
    PageNotFound(String),

    /// The last remaining page can only be torn down via close()
    #[error("Cannot close the last remaining page")]
    CannotCloseLastPage,

    /// The browser did not answer a health probe in time
    #[error("Browser not responding: {0}")]
    Unresponsive(String),

    /// A health probe failed for a reason other than a timeout
    #[error("Health probe failed: {0}")]
    Probe(String),

    /// Auto-recovery is disabled in configuration
    #[error("Auto-recovery is disabled in configuration")]
    RecoveryDisabled,

    /// Recovery could not bring a browser back up
    #[error("Recovery failed: {0}")]
    RecoveryFailed(String),

    /// Failure surfaced by the underlying driver
    #[error("Driver error: {0}")]
    Driver(String),

    /// Navigation error
    #[error("Navigation error: {0}")]
    Navigation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a driver error from any displayable failure
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver(message.into())
    }

    /// Create a launch failure with context
    pub fn launch_failure(message: impl Into<String>) -> Self {
        Self::LaunchFailure(message.into())
    }

    /// Create a recovery failure with context
    pub fn recovery_failed(message: impl Into<String>) -> Self {
        Self::RecoveryFailed(message.into())
    }
}
