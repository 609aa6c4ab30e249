use crate::{Address, BusInfo, Message, MessageBus, MessageHandler, Result, Timestamp, TransportError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Simulated device: maps a published command to an optional reply document.
pub type Responder = Arc<dyn Fn(&Address, &Message) -> Option<Message> + Send + Sync>;

/// A message accepted by the mock bus.
#[derive(Clone, Debug)]
pub struct Published {
    pub address: Address,
    pub message: Message,
    pub timestamp: Timestamp,
}

/// A simple in-process bus. Publishes are recorded; when a responder is installed its
/// replies are delivered to the subscribed handler on a separate task, like a broker would.
pub struct MockBus {
    name: String,
    online: AtomicBool,
    handler: Mutex<Option<Arc<dyn MessageHandler>>>,
    responder: Mutex<Option<Responder>>,
    published: Mutex<Vec<Published>>,
}

impl MockBus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            online: AtomicBool::new(true),
            handler: Mutex::new(None),
            responder: Mutex::new(None),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn list() -> Vec<BusInfo> {
        vec![BusInfo {
            name: "mock0".to_string(),
            driver: "mock".to_string(),
        }]
    }

    /// While offline every publish is rejected.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&Address, &Message) -> Option<Message> + Send + Sync + 'static,
    {
        *self
            .responder
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(responder));
    }

    pub fn published(&self) -> Vec<Published> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Deliver `message` to the subscribed handler as if it arrived from a device.
    pub async fn inject(&self, message: &Message) -> Result<()> {
        let handler = self.current_handler().ok_or(TransportError::Unsupported(
            "no handler subscribed on mock bus",
        ))?;
        handler.on_message(message.to_bytes()?).await;
        Ok(())
    }

    fn current_handler(&self) -> Option<Arc<dyn MessageHandler>> {
        self.handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl MessageBus for MockBus {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, address: &Address, message: &Message) -> Result<()> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable(format!(
                "{} is offline",
                self.name
            )));
        }
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Published {
                address: address.clone(),
                message: message.clone(),
                timestamp: Timestamp::now(),
            });
        debug!(bus = %self.name, topic = %address.topic, "mock publish");

        let responder = self
            .responder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let reply = responder.and_then(|r| r(address, message));
        if let (Some(reply), Some(handler)) = (reply, self.current_handler()) {
            let payload = reply.to_bytes()?;
            tokio::spawn(async move {
                handler.on_message(payload).await;
            });
        }
        Ok(())
    }

    fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
        Ok(())
    }
}
