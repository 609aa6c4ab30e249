//! msg-transport: publish/subscribe abstractions for device messaging
//!
//! Devices are reached through a broker that carries flat key/value JSON documents.
//! This crate defines the document type, the addressing model and the [`MessageBus`]
//! trait the gateway publishes through. The default build enables a `mock` backend so
//! that binaries and tests run without a broker.

mod types;
pub use types::{Address, BusInfo, Message, RawValue, Timestamp};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::{MessageBus, MessageHandler};

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockBus, Published, Responder};
