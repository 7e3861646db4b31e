use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("browser bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("interaction failed: {0}")]
    Interaction(String),

    #[error("page script failed: {0}")]
    Script(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("screenshot failed: {0}")]
    Screenshot(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unsupported browser engine: {0}")]
    UnsupportedEngine(String),

    #[error("session is closed")]
    SessionClosed,

    #[error("cancelled by operator")]
    Cancelled,
}

impl WatchError {
    /// Whether this error means the process cannot continue at all.
    /// Everything else is caught at a step boundary and fed back into
    /// the decision policy as a transient outcome.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WatchError::Bootstrap(_) | WatchError::UnsupportedEngine(_))
    }
}
