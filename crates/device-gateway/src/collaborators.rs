use crate::error::{GatewayError, Result};
use crate::types::Event;
use async_trait::async_trait;
use device_registry::{DeviceProfile, DeviceRegistry, OperatingState, ValueDescriptor};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use time::OffsetDateTime;
use tracing::debug;

/// Catalog of profiles and value descriptors, and sink for device state changes.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn profile(&self, name: &str) -> Result<DeviceProfile>;
    async fn value_descriptors(&self) -> Result<Vec<ValueDescriptor>>;
    async fn add_value_descriptor(&self, desc: &ValueDescriptor) -> Result<()>;
    async fn update_operating_state(&self, device: &str, state: OperatingState) -> Result<()>;
    async fn update_last_connected(&self, device: &str, at: OffsetDateTime) -> Result<()>;
}

/// Downstream store that receives reading events.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn add_event(&self, event: &Event) -> Result<()>;
}

/// In-process metadata backed by a loaded catalog. State updates are recorded.
#[derive(Debug, Default)]
pub struct LocalMetadata {
    catalog: RwLock<DeviceRegistry>,
    descriptors: Mutex<Vec<ValueDescriptor>>,
    state_updates: Mutex<Vec<(String, OperatingState)>>,
    last_connected: Mutex<Vec<(String, OffsetDateTime)>>,
}

impl LocalMetadata {
    pub fn new(catalog: DeviceRegistry) -> Self {
        let descriptors = catalog.value_descriptors.clone();
        Self {
            catalog: RwLock::new(catalog),
            descriptors: Mutex::new(descriptors),
            ..Self::default()
        }
    }

    pub fn upsert_profile(&self, profile: DeviceProfile) {
        self.catalog
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert_profile(profile);
    }

    pub fn state_updates(&self) -> Vec<(String, OperatingState)> {
        self.state_updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn connection_updates(&self) -> usize {
        self.last_connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl MetadataClient for LocalMetadata {
    async fn profile(&self, name: &str) -> Result<DeviceProfile> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .profile(name)
            .cloned()
            .ok_or_else(|| GatewayError::not_found("profile", name))
    }

    async fn value_descriptors(&self) -> Result<Vec<ValueDescriptor>> {
        Ok(self
            .descriptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn add_value_descriptor(&self, desc: &ValueDescriptor) -> Result<()> {
        let mut descriptors = self.descriptors.lock().unwrap_or_else(PoisonError::into_inner);
        if descriptors.iter().all(|d| d.name != desc.name) {
            descriptors.push(desc.clone());
        }
        Ok(())
    }

    async fn update_operating_state(&self, device: &str, state: OperatingState) -> Result<()> {
        debug!(device, ?state, "operating state recorded");
        self.state_updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((device.to_string(), state));
        Ok(())
    }

    async fn update_last_connected(&self, device: &str, at: OffsetDateTime) -> Result<()> {
        self.last_connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((device.to_string(), at));
        Ok(())
    }
}

/// Event store kept in memory; can be made to fail for a number of attempts.
#[derive(Debug)]
pub struct MemoryEventStore {
    events: Mutex<Vec<Event>>,
    available: AtomicBool,
    fail_next: AtomicU32,
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
            fail_next: AtomicU32::new(0),
        }
    }
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Reject the next `n` submissions.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn add_event(&self, event: &Event) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(GatewayError::Store("event store unavailable".into()));
        }
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(GatewayError::Store("event rejected".into()));
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Reading;

    #[tokio::test]
    async fn store_fails_requested_number_of_times() {
        let store = MemoryEventStore::new();
        store.fail_next(2);
        let event = Event::new("d1", vec![Reading::new("d1", "Temp", "21")]);
        assert!(store.add_event(&event).await.is_err());
        assert!(store.add_event(&event).await.is_err());
        assert!(store.add_event(&event).await.is_ok());
        assert_eq!(store.events().len(), 1);
    }

    #[tokio::test]
    async fn metadata_serves_catalog_profiles() {
        let mut catalog = DeviceRegistry::default();
        catalog.insert_profile(DeviceProfile::reference("p1"));
        let meta = LocalMetadata::new(catalog);
        assert!(meta.profile("p1").await.is_ok());
        assert!(meta.profile("p2").await.unwrap_err().is_not_found());
    }
}
