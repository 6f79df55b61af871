use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("controller unreachable: {0}")]
    Unreachable(String),
    #[error("controller answered with HTTP status {0}")]
    Status(u16),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("timeout")]
    Timeout,
    #[error("malformed question: {0}")]
    InvalidQuestion(&'static str),
}
