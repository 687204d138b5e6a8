use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    /// The dialogue engine was unreachable, timed out, or answered with something unusable.
    #[error("dialogue engine: {0}")]
    Engine(String),
    #[error("speech synthesis: {0}")]
    Synthesis(String),
    /// A session record could not be read or written.  Never swallowed.
    #[error("session persistence: {0}")]
    Persistence(String),
    #[error("dashboard notification: {0}")]
    Notification(String),
    #[error("configuration: {0}")]
    Config(String),
}

pub fn handle_error(e: impl std::error::Error) {
    error!("ERROR: {e}")
}
