use device_registry::{CodecError, ProfileError};
use msg_transport::TransportError;
use thiserror::Error;

pub type Result<T, E = GatewayError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },
    #[error("device service is locked")]
    ServiceLocked,
    #[error("device {0} is locked or disabled")]
    Locked(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("send failed: {0}")]
    SendFailure(String),
    #[error("transaction {transaction} timed out with {pending} operations pending")]
    Timeout { transaction: String, pending: usize },
    #[error("assertion failed: {0}")]
    AssertionFailure(String),
    #[error("delivery failed for {device} after {attempts} attempts")]
    DeliveryFailure { device: String, attempts: u32 },
    #[error("event store error: {0}")]
    Store(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl GatewayError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        GatewayError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound { .. })
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, GatewayError::ServiceLocked | GatewayError::Locked(_))
    }
}
