use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("broker not reachable: {0}")]
    Unreachable(String),
    #[error("operation not supported on this backend: {0}")]
    Unsupported(&'static str),
    #[error("publish to {topic} rejected: {reason}")]
    Rejected { topic: String, reason: String },
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
