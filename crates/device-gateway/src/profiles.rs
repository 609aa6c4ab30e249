use crate::collaborators::MetadataClient;
use crate::error::Result;
use device_registry::{
    compile_profile, Compiled, Device, DeviceProfile, DeviceTables, ProfileError,
    ValueDescriptorRegistry,
};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Compiled command tables per device. A recompile swaps the whole table set.
pub struct ProfileStore {
    tables: RwLock<HashMap<String, Arc<DeviceTables>>>,
    registry: ValueDescriptorRegistry,
    metadata: Arc<dyn MetadataClient>,
}

impl ProfileStore {
    /// Seeds the value descriptor registry from metadata.
    pub async fn new(metadata: Arc<dyn MetadataClient>) -> Result<Self> {
        let registry = ValueDescriptorRegistry::with_descriptors(metadata.value_descriptors().await?);
        debug!(descriptors = registry.len(), "value descriptors seeded");
        Ok(Self {
            tables: RwLock::new(HashMap::new()),
            registry,
            metadata,
        })
    }

    pub fn registry(&self) -> &ValueDescriptorRegistry {
        &self.registry
    }

    pub fn tables(&self, device: &str) -> Option<Arc<DeviceTables>> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device)
            .cloned()
    }

    /// Compile `device`'s profile and swap in the result.
    ///
    /// A profile without device resources is fetched in full from metadata once.
    pub async fn compile_for(&self, device: &Device) -> Result<Arc<DeviceTables>> {
        let compiled = match compile_profile(&device.profile, &self.registry) {
            Err(ProfileError::Incomplete(name)) => {
                debug!(device = %device.name, profile = %name, "fetching full profile");
                let full = self.metadata.profile(&name).await?;
                compile_profile(&full, &self.registry)?
            }
            other => other?,
        };
        self.publish_descriptors(&compiled).await;
        Ok(self.install(&device.name, compiled.tables))
    }

    /// Compile an updated profile for each listed device. Devices are swapped one at a time.
    pub async fn update_profile(
        &self,
        profile: &DeviceProfile,
        devices: &[String],
    ) -> Result<usize> {
        if devices.is_empty() {
            return Ok(0);
        }
        let compiled = compile_profile(profile, &self.registry)?;
        self.publish_descriptors(&compiled).await;
        for name in devices {
            self.install(name, compiled.tables.clone());
        }
        info!(profile = %profile.name, devices = devices.len(), "profile recompiled");
        Ok(devices.len())
    }

    pub fn install(&self, device: &str, tables: DeviceTables) -> Arc<DeviceTables> {
        let tables = Arc::new(tables);
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device.to_string(), tables.clone());
        tables
    }

    pub fn remove(&self, device: &str) -> Option<Arc<DeviceTables>> {
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(device)
    }

    async fn publish_descriptors(&self, compiled: &Compiled) {
        for desc in &compiled.registered {
            if let Err(e) = self.metadata.add_value_descriptor(desc).await {
                warn!(descriptor = %desc.name, error = %e, "failed to publish value descriptor");
            }
        }
    }
}
