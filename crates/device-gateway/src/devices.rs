use crate::error::{GatewayError, Result};
use crate::types::DeviceStatus;
use dashmap::DashMap;
use device_registry::{AdminState, Device, OperatingState};
use msg_transport::Address;
use std::sync::atomic::{AtomicBool, Ordering};
use time::OffsetDateTime;

#[derive(Debug, Clone)]
struct Entry {
    device: Device,
    last_connected: Option<OffsetDateTime>,
}

/// Devices served by this gateway with their runtime state.
#[derive(Debug, Default)]
pub struct DeviceStore {
    devices: DashMap<String, Entry>,
    service_locked: AtomicBool,
}

impl DeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, device: Device) {
        self.devices.insert(
            device.name.clone(),
            Entry {
                device,
                last_connected: None,
            },
        );
    }

    pub fn remove(&self, name: &str) -> Option<Device> {
        self.devices.remove(name).map(|(_, e)| e.device)
    }

    pub fn get(&self, name: &str) -> Option<Device> {
        self.devices.get(name).map(|e| e.device.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    pub fn address(&self, name: &str) -> Option<Address> {
        self.devices.get(name).map(|e| e.device.addressable.clone())
    }

    pub fn status(&self, name: &str) -> Option<DeviceStatus> {
        self.devices.get(name).map(|e| DeviceStatus {
            name: e.device.name.clone(),
            admin_state: e.device.admin_state,
            operating_state: e.device.operating_state,
            last_connected: e.last_connected,
        })
    }

    /// Device names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.devices.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }

    /// Names of devices using `profile`.
    pub fn using_profile(&self, profile: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .devices
            .iter()
            .filter(|e| e.device.profile.name == profile)
            .map(|e| e.key().clone())
            .collect();
        names.sort_unstable();
        names
    }

    /// Device whose name or addressable name matches an inbound identity token.
    pub fn find_by_identity(&self, token: &str) -> Option<String> {
        if self.devices.contains_key(token) {
            return Some(token.to_string());
        }
        self.devices
            .iter()
            .find(|e| e.device.addressable.name == token)
            .map(|e| e.key().clone())
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn set_admin_state(&self, name: &str, state: AdminState) -> Result<()> {
        let mut entry = self
            .devices
            .get_mut(name)
            .ok_or_else(|| GatewayError::not_found("device", name))?;
        entry.device.admin_state = state;
        Ok(())
    }

    /// Returns the previous state, or None for an unknown device.
    pub fn set_operating_state(&self, name: &str, state: OperatingState) -> Option<OperatingState> {
        let mut entry = self.devices.get_mut(name)?;
        let previous = entry.device.operating_state;
        entry.device.operating_state = state;
        Some(previous)
    }

    pub fn touch(&self, name: &str, at: OffsetDateTime) {
        if let Some(mut entry) = self.devices.get_mut(name) {
            entry.last_connected = Some(at);
        }
    }

    pub fn lock_service(&self, locked: bool) {
        self.service_locked.store(locked, Ordering::SeqCst);
    }

    pub fn is_service_locked(&self) -> bool {
        self.service_locked.load(Ordering::SeqCst)
    }

    /// Fails when the service is locked, the device is unknown, or it is locked or disabled.
    pub fn ensure_available(&self, name: &str) -> Result<()> {
        if self.is_service_locked() {
            return Err(GatewayError::ServiceLocked);
        }
        let status = self
            .status(name)
            .ok_or_else(|| GatewayError::not_found("device", name))?;
        if !status.is_available() {
            return Err(GatewayError::Locked(name.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_registry::DeviceProfile;

    fn device(name: &str) -> Device {
        Device {
            id: None,
            name: name.into(),
            description: None,
            labels: vec![],
            profile: DeviceProfile::reference("p"),
            addressable: Address::new(format!("{name}-addr"), format!("cmd/{name}")),
            admin_state: AdminState::Unlocked,
            operating_state: OperatingState::Enabled,
        }
    }

    #[test]
    fn availability_checks() {
        let store = DeviceStore::new();
        store.insert(device("a"));
        assert!(store.ensure_available("a").is_ok());
        assert!(store.ensure_available("zz").unwrap_err().is_not_found());

        store.set_admin_state("a", AdminState::Locked).unwrap();
        assert!(matches!(store.ensure_available("a"), Err(GatewayError::Locked(_))));
        store.set_admin_state("a", AdminState::Unlocked).unwrap();

        assert_eq!(
            store.set_operating_state("a", OperatingState::Disabled),
            Some(OperatingState::Enabled)
        );
        assert!(store.ensure_available("a").unwrap_err().is_locked());
        store.set_operating_state("a", OperatingState::Enabled);

        store.lock_service(true);
        assert!(matches!(store.ensure_available("a"), Err(GatewayError::ServiceLocked)));
    }

    #[test]
    fn identity_matches_name_or_addressable() {
        let store = DeviceStore::new();
        store.insert(device("pump"));
        assert_eq!(store.find_by_identity("pump").as_deref(), Some("pump"));
        assert_eq!(store.find_by_identity("pump-addr").as_deref(), Some("pump"));
        assert_eq!(store.find_by_identity("other"), None);
    }
}
