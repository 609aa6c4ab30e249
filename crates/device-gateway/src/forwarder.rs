use crate::collaborators::{EventStore, MetadataClient};
use crate::config::DeliveryConfig;
use crate::devices::DeviceStore;
use crate::error::GatewayError;
use crate::metrics::MetricsHub;
use crate::types::{Event, Reading};
use device_registry::OperatingState;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

/// Pushes reading events downstream and keeps device health in step with the outcome.
pub struct DeliveryForwarder {
    store: Arc<dyn EventStore>,
    metadata: Arc<dyn MetadataClient>,
    devices: Arc<DeviceStore>,
    retries: u32,
    delay: Duration,
    metrics: MetricsHub,
}

impl DeliveryForwarder {
    pub fn new(
        store: Arc<dyn EventStore>,
        metadata: Arc<dyn MetadataClient>,
        devices: Arc<DeviceStore>,
        config: &DeliveryConfig,
        metrics: MetricsHub,
    ) -> Self {
        Self {
            store,
            metadata,
            devices,
            retries: config.retries,
            delay: config.retry_delay(),
            metrics,
        }
    }

    /// Submit `readings` as one event. Returns the delivered readings, or an empty
    /// list once every attempt has failed and the device has been disabled.
    pub async fn deliver(&self, device: &str, readings: Vec<Reading>) -> Vec<Reading> {
        if readings.is_empty() {
            return readings;
        }
        let event = Event::new(device, readings);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.store.add_event(&event).await {
                Ok(()) => {
                    debug!(device, readings = event.readings.len(), attempt, "event delivered");
                    self.metrics.gw.events_delivered.inc();
                    self.mark_connected(device).await;
                    return event.readings;
                }
                Err(e) => {
                    warn!(device, attempt, error = %e, "event delivery failed");
                    if self.retries != 0 && attempt >= self.retries {
                        break;
                    }
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
        let failure = GatewayError::DeliveryFailure {
            device: device.to_string(),
            attempts: attempt,
        };
        error!(error = %failure, "giving up on event delivery");
        self.metrics.gw.delivery_failures.inc();
        self.disable(device).await;
        Vec::new()
    }

    /// Disable an enabled device and tell metadata about it.
    pub async fn disable(&self, device: &str) {
        if self.devices.set_operating_state(device, OperatingState::Disabled)
            == Some(OperatingState::Enabled)
        {
            info!(device, "device disabled");
            self.report_state(device, OperatingState::Disabled).await;
        }
    }

    async fn mark_connected(&self, device: &str) {
        let now = OffsetDateTime::now_utc();
        self.devices.touch(device, now);
        if let Err(e) = self.metadata.update_last_connected(device, now).await {
            warn!(device, error = %e, "failed to update last connected");
        }
        if self.devices.set_operating_state(device, OperatingState::Enabled)
            == Some(OperatingState::Disabled)
        {
            info!(device, "device re-enabled");
            self.report_state(device, OperatingState::Enabled).await;
        }
    }

    async fn report_state(&self, device: &str, state: OperatingState) {
        if let Err(e) = self.metadata.update_operating_state(device, state).await {
            warn!(device, ?state, error = %e, "failed to update operating state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{LocalMetadata, MemoryEventStore};
    use device_registry::{AdminState, Device, DeviceProfile, DeviceRegistry};
    use msg_transport::Address;

    type Setup = (
        DeliveryForwarder,
        Arc<MemoryEventStore>,
        Arc<DeviceStore>,
        Arc<LocalMetadata>,
    );

    fn setup(retries: u32) -> Setup {
        let store = Arc::new(MemoryEventStore::new());
        let metadata = Arc::new(LocalMetadata::new(DeviceRegistry::default()));
        let devices = Arc::new(DeviceStore::new());
        devices.insert(Device {
            id: None,
            name: "d1".into(),
            description: None,
            labels: vec![],
            profile: DeviceProfile::reference("p"),
            addressable: Address::new("d1", "cmd/d1"),
            admin_state: AdminState::Unlocked,
            operating_state: OperatingState::Enabled,
        });
        let config = DeliveryConfig {
            retries,
            retry_delay_ms: 1,
        };
        let forwarder = DeliveryForwarder::new(
            store.clone(),
            metadata.clone(),
            devices.clone(),
            &config,
            MetricsHub::new().unwrap(),
        );
        (forwarder, store, devices, metadata)
    }

    fn readings() -> Vec<Reading> {
        vec![Reading::new("d1", "Temp", "21")]
    }

    #[tokio::test]
    async fn exhausted_retries_disable_then_success_recovers() {
        let (fwd, store, devices, metadata) = setup(3);
        store.fail_next(3);

        assert!(fwd.deliver("d1", readings()).await.is_empty());
        assert_eq!(
            devices.status("d1").map(|s| s.operating_state),
            Some(OperatingState::Disabled)
        );
        assert!(store.events().is_empty());

        assert_eq!(fwd.deliver("d1", readings()).await.len(), 1);
        let status = devices.status("d1").unwrap();
        assert_eq!(status.operating_state, OperatingState::Enabled);
        assert!(status.last_connected.is_some());
        assert_eq!(
            metadata.state_updates(),
            [
                ("d1".to_string(), OperatingState::Disabled),
                ("d1".to_string(), OperatingState::Enabled)
            ]
        );
    }

    #[tokio::test]
    async fn succeeds_within_retry_budget() {
        let (fwd, store, devices, _) = setup(3);
        store.fail_next(2);
        assert_eq!(fwd.deliver("d1", readings()).await.len(), 1);
        assert_eq!(
            devices.status("d1").map(|s| s.operating_state),
            Some(OperatingState::Enabled)
        );
    }

    #[tokio::test]
    async fn zero_retries_keeps_trying() {
        let (fwd, store, _, _) = setup(0);
        store.fail_next(10);
        assert_eq!(fwd.deliver("d1", readings()).await.len(), 1);
        assert_eq!(store.events().len(), 1);
    }
}
