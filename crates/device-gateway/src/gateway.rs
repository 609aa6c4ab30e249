use crate::collaborators::{EventStore, MetadataClient};
use crate::config::{DeviceCommand, GatewayConfig};
use crate::devices::DeviceStore;
use crate::engine::{arguments_from_value, parse_arguments, Arguments, CommandEngine, Readings};
use crate::error::{GatewayError, Result};
use crate::forwarder::DeliveryForwarder;
use crate::inbound::{Dispatcher, InboundRouter};
use crate::metrics::MetricsHub;
use crate::profiles::ProfileStore;
use device_registry::{Device, DeviceProfile, OperatingState};
use msg_transport::MessageBus;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Target that addresses every device in [`Gateway::execute_target`].
pub const ALL_DEVICES: &str = "all";

/// The gateway service: owns the device set and wires the engine to the bus.
pub struct Gateway {
    config: GatewayConfig,
    metadata: Arc<dyn MetadataClient>,
    devices: Arc<DeviceStore>,
    profiles: Arc<ProfileStore>,
    engine: Arc<CommandEngine>,
    forwarder: Arc<DeliveryForwarder>,
    metrics: MetricsHub,
}

impl Gateway {
    /// Build the service and subscribe it to `bus`.
    pub async fn start(
        config: GatewayConfig,
        bus: Arc<dyn MessageBus>,
        metadata: Arc<dyn MetadataClient>,
        store: Arc<dyn EventStore>,
    ) -> Result<Self> {
        config.validate()?;
        let metrics = MetricsHub::new().map_err(GatewayError::Config)?;
        let devices = Arc::new(DeviceStore::new());
        let profiles = Arc::new(ProfileStore::new(metadata.clone()).await?);
        let dispatcher = Arc::new(Dispatcher::new(bus.clone(), config.correlation_key.clone()));
        let forwarder = Arc::new(DeliveryForwarder::new(
            store,
            metadata.clone(),
            devices.clone(),
            &config.delivery,
            metrics.clone(),
        ));
        let engine = Arc::new(CommandEngine::new(
            config.clone(),
            devices.clone(),
            profiles.clone(),
            dispatcher.clone(),
            forwarder.clone(),
            metrics.clone(),
        ));
        bus.subscribe(Arc::new(InboundRouter::new(
            dispatcher,
            Arc::downgrade(&engine),
        )))?;
        info!(service = %config.service_name, bus = bus.name(), "gateway started");

        Ok(Self {
            config,
            metadata,
            devices,
            profiles,
            engine,
            forwarder,
            metrics,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn devices(&self) -> &DeviceStore {
        &self.devices
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn engine(&self) -> &Arc<CommandEngine> {
        &self.engine
    }

    pub fn forwarder(&self) -> &DeliveryForwarder {
        &self.forwarder
    }

    pub fn metrics(&self) -> &MetricsHub {
        &self.metrics
    }

    /// Compile the device's profile, register it and run the init command when
    /// the device is enabled.
    pub async fn add_device(&self, device: Device) -> Result<()> {
        let name = device.name.clone();
        self.profiles.compile_for(&device).await?;
        self.devices.insert(device);
        self.metrics.gw.devices_loaded.set(self.devices.len() as i64);
        info!(device = %name, "device added");

        if let Some(init) = &self.config.command.init {
            if self.devices.ensure_available(&name).is_ok() {
                self.run_configured(&name, init).await;
            }
        }
        Ok(())
    }

    /// Run the remove command, then forget the device and mark it disabled.
    pub async fn remove_device(&self, name: &str) -> Result<Device> {
        if !self.devices.contains(name) {
            return Err(GatewayError::not_found("device", name));
        }
        if let Some(remove) = &self.config.command.remove {
            if self.devices.ensure_available(name).is_ok() {
                self.run_configured(name, remove).await;
            }
        }
        self.profiles.remove(name);
        self.engine.cache().clear_device(name);
        let device = self
            .devices
            .remove(name)
            .ok_or_else(|| GatewayError::not_found("device", name))?;
        self.metrics.gw.devices_loaded.set(self.devices.len() as i64);
        if let Err(e) = self
            .metadata
            .update_operating_state(name, OperatingState::Disabled)
            .await
        {
            warn!(device = name, error = %e, "failed to update operating state");
        }
        info!(device = name, "device removed");
        Ok(device)
    }

    /// Recompile every device using `profile`.
    pub async fn update_profile(&self, profile: &DeviceProfile) -> Result<usize> {
        let devices = self.devices.using_profile(&profile.name);
        self.profiles.update_profile(profile, &devices).await
    }

    pub async fn execute(
        &self,
        device: &str,
        command: &str,
        args: Option<&Arguments>,
    ) -> Result<Readings> {
        self.engine.execute(device, command, args).await
    }

    pub async fn execute_all(
        &self,
        command: &str,
        args: Option<&Arguments>,
    ) -> Result<BTreeMap<String, Readings>> {
        self.engine.execute_all(command, args).await
    }

    /// Caller-facing entry: `target` is a device name or `all`, `args` an optional
    /// JSON object. Results are keyed by device.
    pub async fn execute_target(
        &self,
        target: &str,
        command: &str,
        args: Option<&str>,
    ) -> Result<BTreeMap<String, Readings>> {
        let args = args.map(parse_arguments).transpose()?;
        if target == ALL_DEVICES {
            return self.execute_all(command, args.as_ref()).await;
        }
        let readings = self.execute(target, command, args.as_ref()).await?;
        Ok(BTreeMap::from([(target.to_string(), readings)]))
    }

    pub fn heartbeat(&self) {
        info!(
            service = %self.config.service_name,
            devices = self.devices.len(),
            transactions = self.engine.tracker().len(),
            "heartbeat"
        );
    }

    async fn run_configured(&self, device: &str, command: &DeviceCommand) {
        let args = match command.args.as_ref().map(arguments_from_value).transpose() {
            Ok(args) => args,
            Err(e) => {
                warn!(device, command = %command.command, error = %e, "bad configured arguments");
                return;
            }
        };
        let name = command.command.as_str();
        match self.execute(device, name, args.as_ref()).await {
            Ok(readings) => info!(device, command = name, readings = readings.len(), "configured command ran"),
            Err(e) => warn!(device, command = name, error = %e, "configured command failed"),
        }
    }
}
