#![allow(dead_code)]

use device_gateway::{Gateway, GatewayConfig, LocalMetadata, MemoryEventStore};
use device_registry::{AdminState, Device, DeviceProfile, DeviceRegistry, OperatingState};
use msg_transport::{Address, Message, MockBus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PROFILE: &str = r#"
name: door-sensor
device_resources:
  - name: Door
    attributes: { name: door }
    properties:
      value: { type: i, read_write: rw, size: 4, mask: "0xF0", shift: 4 }
  - name: Latch
    attributes: { name: door }
    properties:
      value: { type: i, read_write: rw, size: 4, mask: "0x0F" }
  - name: Temperature
    attributes: { name: temp }
    properties:
      value: { type: i, read_write: r, size: 4, scale: 0.1 }
  - name: Humidity
    attributes: { name: hum }
    properties:
      value: { type: f, read_write: r, size: 4, scale: 0.5 }
  - name: Alarm
    attributes: { name: alarm }
    properties:
      value: { type: i, read_write: r, size: 2, assertion: 0 }
  - name: Level
    attributes: { name: level }
    properties:
      value: { type: i, read_write: rw, size: 4 }
resources:
  - name: Climate
    get:
      - { operation: get, object: Temperature }
      - { operation: get, object: Humidity }
  - name: Everything
    get:
      - { operation: get, resource: Climate }
      - { operation: get, object: Door }
  - name: DoorAndLatch
    set:
      - { operation: set, object: Door, secondary: [Latch] }
  - name: Calibration
    get:
      - { operation: get, object: Temperature, property: units }
commands:
  - name: Door
    expected_values: [Door]
    parameter_names: [Door]
  - name: Climate
    expected_values: [Temperature, Humidity]
"#;

/// Simulated register files keyed by device topic, then wire attribute.
pub type Registers = Arc<Mutex<HashMap<String, HashMap<String, String>>>>;

pub struct Harness {
    pub gateway: Gateway,
    pub bus: Arc<MockBus>,
    pub store: Arc<MemoryEventStore>,
    pub metadata: Arc<LocalMetadata>,
    pub registers: Registers,
}

impl Harness {
    /// Messages published with `cmd` set to `cmd`.
    pub fn published_cmds(&self, cmd: &str) -> Vec<Message> {
        self.bus
            .published()
            .into_iter()
            .map(|p| p.message)
            .filter(|m| m.get_str("cmd").as_deref() == Some(cmd))
            .collect()
    }

    pub fn set_register(&self, device: &str, attr: &str, value: &str) {
        self.registers
            .lock()
            .unwrap()
            .entry(topic(device))
            .or_default()
            .insert(attr.to_string(), value.to_string());
    }

    pub fn register(&self, device: &str, attr: &str) -> Option<String> {
        self.registers
            .lock()
            .unwrap()
            .get(&topic(device))
            .and_then(|r| r.get(attr).cloned())
    }
}

pub fn profile() -> DeviceProfile {
    serde_yaml::from_str(PROFILE).unwrap()
}

pub fn topic(device: &str) -> String {
    format!("cmd/{device}")
}

/// A device that refers to its profile by name only.
pub fn device(name: &str) -> Device {
    Device {
        id: None,
        name: name.to_string(),
        description: None,
        labels: vec![],
        profile: DeviceProfile::reference("door-sensor"),
        addressable: Address::new(name, topic(name)),
        admin_state: AdminState::Unlocked,
        operating_state: OperatingState::Enabled,
    }
}

fn default_registers() -> HashMap<String, String> {
    HashMap::from([
        ("door".to_string(), "0A05".to_string()),
        ("temp".to_string(), "00D2".to_string()),
        ("hum".to_string(), "0050".to_string()),
        ("alarm".to_string(), "00".to_string()),
        ("level".to_string(), "0000".to_string()),
    ])
}

pub fn quick_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.command.timeout_ms = 300;
    config.delivery.retry_delay_ms = 1;
    config
}

/// Devices in `simulated` answer commands; others in `silent` never reply.
pub async fn harness_with(config: GatewayConfig, simulated: &[&str], silent: &[&str]) -> Harness {
    let mut catalog = DeviceRegistry::default();
    catalog.insert_profile(profile());
    let metadata = Arc::new(LocalMetadata::new(catalog));
    let store = Arc::new(MemoryEventStore::new());
    let bus = Arc::new(MockBus::new("mock0"));
    let registers = Registers::default();
    for name in simulated {
        registers
            .lock()
            .unwrap()
            .insert(topic(name), default_registers());
    }
    install_responder(&bus, registers.clone());

    let gateway = Gateway::start(config, bus.clone(), metadata.clone(), store.clone())
        .await
        .unwrap();
    for name in simulated.iter().chain(silent) {
        gateway.add_device(device(name)).await.unwrap();
    }
    Harness {
        gateway,
        bus,
        store,
        metadata,
        registers,
    }
}

pub async fn harness(simulated: &[&str]) -> Harness {
    harness_with(quick_config(), simulated, &[]).await
}

fn install_responder(bus: &MockBus, registers: Registers) {
    bus.set_responder(move |address, msg| {
        let uuid = msg.get_str("uuid")?;
        let attr = msg.get_str("name")?;
        let mut regs = registers.lock().unwrap();
        let device = regs.get_mut(&address.topic)?;
        if msg.get_str("cmd").as_deref() == Some("set") {
            device.insert(attr.clone(), msg.get_str("param")?);
        }
        let value = device.get(&attr)?.clone();
        Some(Message::new().with("uuid", uuid).with(attr, value))
    });
}

pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
