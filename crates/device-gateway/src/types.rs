use device_registry::{AdminState, OperatingState};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One named engineering value produced for a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub name: String,
    pub value: String,
    pub device: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Reading {
    pub fn new(device: impl Into<String>, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            device: device.into(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Readings for one device, as submitted to the event store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub device: String,
    pub readings: Vec<Reading>,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
}

impl Event {
    pub fn new(device: impl Into<String>, readings: Vec<Reading>) -> Self {
        Self {
            device: device.into(),
            readings,
            created: OffsetDateTime::now_utc(),
        }
    }
}

/// Point-in-time view of a device's runtime state.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub name: String,
    pub admin_state: AdminState,
    pub operating_state: OperatingState,
    pub last_connected: Option<OffsetDateTime>,
}

impl DeviceStatus {
    pub fn is_available(&self) -> bool {
        self.admin_state == AdminState::Unlocked && self.operating_state == OperatingState::Enabled
    }
}
