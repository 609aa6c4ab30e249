use crate::{Address, Message, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Receives every payload that arrives on the inbound channel.
///
/// Implementations must return quickly: the transport's listener awaits this call
/// before taking the next message off the wire.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, payload: Vec<u8>);
}

/// A minimal publish/subscribe message bus.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Backend name, used in logs.
    fn name(&self) -> &str;

    /// Publish one document to the device behind `address`.
    async fn publish(&self, address: &Address, message: &Message) -> Result<()>;

    /// Install the handler for inbound payloads (replies and unsolicited data).
    fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> Result<()>;
}
