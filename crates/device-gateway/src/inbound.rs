use crate::engine::CommandEngine;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use msg_transport::{Address, Message, MessageBus, MessageHandler};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

/// Publishes commands and hands each correlated reply to the task waiting for it.
pub struct Dispatcher {
    bus: Arc<dyn MessageBus>,
    correlation_key: String,
    pending: DashMap<String, oneshot::Sender<Message>>,
}

impl Dispatcher {
    pub fn new(bus: Arc<dyn MessageBus>, correlation_key: impl Into<String>) -> Self {
        Self {
            bus,
            correlation_key: correlation_key.into(),
            pending: DashMap::new(),
        }
    }

    pub fn correlation_key(&self) -> &str {
        &self.correlation_key
    }

    /// Stamp `message` with a fresh correlation id, publish it and wait for the reply.
    pub async fn request(
        &self,
        address: &Address,
        mut message: Message,
        timeout: Duration,
    ) -> Result<Message> {
        let id = Uuid::new_v4().to_string();
        message.insert(self.correlation_key.clone(), id.clone());
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);
        // cleared on every exit, including the caller dropping this future
        let _pending = PendingReply {
            pending: &self.pending,
            id: &id,
        };

        if let Err(e) = self.bus.publish(address, &message).await {
            return Err(GatewayError::SendFailure(format!("{address}: {e}")));
        }
        debug!(correlation = %id, %address, "request published");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(GatewayError::SendFailure(format!(
                "{address}: reply channel closed"
            ))),
            Err(_) => Err(GatewayError::Timeout {
                transaction: id.clone(),
                pending: 1,
            }),
        }
    }

    /// Deliver a correlated reply. Messages without a correlation id are handed back.
    pub fn route_reply(&self, message: Message) -> Option<Message> {
        let Some(id) = message.get_str(&self.correlation_key) else {
            return Some(message);
        };
        match self.pending.remove(&id) {
            Some((_, waiter)) => {
                if waiter.send(message).is_err() {
                    debug!(correlation = %id, "reply arrived after requester left");
                }
            }
            None => warn!(correlation = %id, "reply for unknown correlation id"),
        }
        None
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

struct PendingReply<'a> {
    pending: &'a DashMap<String, oneshot::Sender<Message>>,
    id: &'a str,
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

/// Subscribed to the bus: routes replies to the dispatcher and unsolicited data to the engine.
pub struct InboundRouter {
    dispatcher: Arc<Dispatcher>,
    engine: Weak<CommandEngine>,
}

impl InboundRouter {
    pub fn new(dispatcher: Arc<Dispatcher>, engine: Weak<CommandEngine>) -> Self {
        Self { dispatcher, engine }
    }
}

#[async_trait]
impl MessageHandler for InboundRouter {
    async fn on_message(&self, payload: Vec<u8>) {
        let message = match Message::from_slice(&payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "dropping malformed inbound message");
                return;
            }
        };
        let Some(message) = self.dispatcher.route_reply(message) else {
            return;
        };
        match self.engine.upgrade() {
            Some(engine) => engine.ingest(message).await,
            None => debug!("engine gone, dropping inbound message"),
        }
    }
}
