//! device-gateway: command execution, reply correlation and event delivery for bus-attached devices

mod error;
pub use error::{GatewayError, Result};

mod config;
pub use config::{CommandConfig, DataConfig, DeliveryConfig, DeviceCommand, GatewayConfig};

mod types;
pub use types::{DeviceStatus, Event, Reading};

mod collaborators;
pub use collaborators::{EventStore, LocalMetadata, MemoryEventStore, MetadataClient};

mod devices;
pub use devices::DeviceStore;

mod profiles;
pub use profiles::ProfileStore;

mod cache;
pub use cache::ReadingCache;

mod transaction;
pub use transaction::{Outcome, TransactionTracker};

mod inbound;
pub use inbound::{Dispatcher, InboundRouter};

mod engine;
pub use engine::{arguments_from_value, parse_arguments, Arguments, CommandEngine, Readings};

mod forwarder;
pub use forwarder::DeliveryForwarder;

mod metrics;
pub use metrics::{GatewayMetrics, MetricsHub};

mod gateway;
pub use gateway::{Gateway, ALL_DEVICES};
