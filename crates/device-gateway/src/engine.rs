use crate::cache::ReadingCache;
use crate::config::GatewayConfig;
use crate::devices::DeviceStore;
use crate::error::{GatewayError, Result};
use crate::forwarder::DeliveryForwarder;
use crate::inbound::Dispatcher;
use crate::metrics::MetricsHub;
use crate::profiles::ProfileStore;
use crate::transaction::TransactionTracker;
use crate::types::Reading;
use device_registry::{
    decode, encode, field_value, masked_merge, raw_text, resolve_argument, Action, AdminState,
    CodecError, DecodeMode, DeviceTables, ObjectDescriptor, ResourceOperation,
};
use msg_transport::{Address, Message, RawValue};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Reading name to value.
pub type Readings = BTreeMap<String, String>;

/// Write arguments keyed by parameter name.
pub type Arguments = BTreeMap<String, String>;

/// Parse a JSON argument document. Scalars are kept as text, nulls are dropped.
pub fn parse_arguments(json: &str) -> Result<Arguments> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| GatewayError::BadRequest(format!("argument document: {e}")))?;
    arguments_from_value(&value)
}

pub fn arguments_from_value(value: &Value) -> Result<Arguments> {
    let Value::Object(fields) = value else {
        return Err(GatewayError::BadRequest(
            "arguments must be a JSON object".into(),
        ));
    };
    let mut args = Arguments::new();
    for (name, v) in fields {
        let text = match v {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => {
                return Err(GatewayError::BadRequest(format!(
                    "argument {name} must be a scalar"
                )))
            }
        };
        args.insert(name.clone(), text);
    }
    Ok(args)
}

/// One operation that talks to a device object.
#[derive(Debug, Clone)]
struct Leaf {
    action: Action,
    op: ResourceOperation,
    object: Arc<ObjectDescriptor>,
}

impl Leaf {
    /// Cache key for this leaf's reading set.
    fn signature(&self) -> Vec<String> {
        std::iter::once(self.object.name.clone())
            .chain(self.op.secondary.iter().cloned())
            .collect()
    }

    fn reading_name(&self) -> &str {
        self.op.parameter_name()
    }
}

/// Expand `ops` into leaves, following resource references with the same action.
fn plan(
    tables: &DeviceTables,
    ops: &[ResourceOperation],
    action: Action,
    leaves: &mut Vec<Leaf>,
) -> Result<()> {
    for op in ops {
        if let Some(resource) = &op.resource {
            let nested = tables
                .commands
                .get(resource)
                .ok_or_else(|| GatewayError::not_found("resource", resource))?;
            plan(tables, nested.for_action(action), action, leaves)?;
            continue;
        }
        let name = op.object.as_deref().unwrap_or_default();
        let object = tables
            .object(name)
            .ok_or_else(|| GatewayError::not_found("object", name))?;
        if !op.property.eq_ignore_ascii_case("value") {
            return Err(GatewayError::BadRequest(format!(
                "property {} of {name} is not supported",
                op.property
            )));
        }
        leaves.push(Leaf {
            action: op.operation,
            op: op.clone(),
            object: object.clone(),
        });
    }
    Ok(())
}

fn bad_argument(object: &str, e: CodecError) -> GatewayError {
    GatewayError::BadRequest(format!("{object}: {e}"))
}

/// Resolves commands into leaf operations, runs them over the bus and collects
/// the readings once every leaf has answered.
pub struct CommandEngine {
    config: GatewayConfig,
    devices: Arc<DeviceStore>,
    profiles: Arc<ProfileStore>,
    cache: ReadingCache,
    tracker: TransactionTracker,
    dispatcher: Arc<Dispatcher>,
    forwarder: Arc<DeliveryForwarder>,
    metrics: MetricsHub,
}

impl CommandEngine {
    pub fn new(
        config: GatewayConfig,
        devices: Arc<DeviceStore>,
        profiles: Arc<ProfileStore>,
        dispatcher: Arc<Dispatcher>,
        forwarder: Arc<DeliveryForwarder>,
        metrics: MetricsHub,
    ) -> Self {
        Self {
            cache: ReadingCache::new(config.data.cache_size),
            tracker: TransactionTracker::new(),
            config,
            devices,
            profiles,
            dispatcher,
            forwarder,
            metrics,
        }
    }

    pub fn cache(&self) -> &ReadingCache {
        &self.cache
    }

    pub fn tracker(&self) -> &TransactionTracker {
        &self.tracker
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run `command` on `device`. Present `args` make it a write.
    pub async fn execute(
        self: &Arc<Self>,
        device: &str,
        command: &str,
        args: Option<&Arguments>,
    ) -> Result<Readings> {
        self.devices.ensure_available(device)?;
        let tables = self
            .profiles
            .tables(device)
            .ok_or_else(|| GatewayError::not_found("device", device))?;
        let address = self
            .devices
            .address(device)
            .ok_or_else(|| GatewayError::not_found("device", device))?;
        let action = if args.is_some() { Action::Set } else { Action::Get };
        let ops = tables
            .commands
            .resolve(command, action)
            .ok_or_else(|| GatewayError::not_found("command", command))?;

        let mut leaves = Vec::new();
        plan(&tables, ops, action, &mut leaves)?;
        self.metrics.gw.commands.inc();
        debug!(device, command, action = action.as_str(), leaves = leaves.len(), "executing");

        // Writes are encoded up front so a bad argument sends nothing.
        let mut values = Vec::with_capacity(leaves.len());
        for leaf in &leaves {
            values.push(match leaf.action {
                Action::Set => Some(self.write_value(device, &address, &tables, leaf, args).await?),
                Action::Get => None,
            });
        }

        let transaction = self.tracker.begin();
        let _guard = self.tracker.guard(&transaction);
        for (leaf, value) in leaves.into_iter().zip(values) {
            let cached = if self.config.command.immediate || leaf.action == Action::Set {
                None
            } else {
                self.cache.get_response_set(device, &leaf.signature())
            };
            let op = self.tracker.new_operation(&transaction)?;
            match cached {
                Some(readings) => {
                    self.metrics.gw.cache_hits.inc();
                    self.tracker.complete(&op, readings);
                }
                None => {
                    tokio::spawn(Arc::clone(self).run_leaf(
                        device.to_string(),
                        address.clone(),
                        leaf,
                        value,
                        op,
                    ));
                }
            }
        }

        let outcome = match self
            .tracker
            .await_completion(&transaction, self.config.command.timeout())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                if matches!(e, GatewayError::Timeout { .. }) {
                    self.metrics.gw.timeouts.inc();
                }
                warn!(device, command, error = %e, "command did not complete");
                return Err(e);
            }
        };
        if outcome.readings.is_empty() {
            if let Some(first) = outcome.failures.into_iter().next() {
                if matches!(first, GatewayError::Timeout { .. }) {
                    self.metrics.gw.timeouts.inc();
                }
                return Err(first);
            }
        } else if !outcome.failures.is_empty() {
            warn!(device, command, failed = outcome.failures.len(), "partial result");
        }

        if self.config.command.forward_readings && !outcome.readings.is_empty() {
            let forwarder = self.forwarder.clone();
            let device = device.to_string();
            let readings = outcome.readings.clone();
            tokio::spawn(async move {
                forwarder.deliver(&device, readings).await;
            });
        }
        Ok(outcome
            .readings
            .into_iter()
            .map(|r| (r.name, r.value))
            .collect())
    }

    /// Run `command` on every available device that has it. Devices that are
    /// locked, disabled or fail are left out of the result.
    pub async fn execute_all(
        self: &Arc<Self>,
        command: &str,
        args: Option<&Arguments>,
    ) -> Result<BTreeMap<String, Readings>> {
        if self.devices.is_service_locked() {
            return Err(GatewayError::ServiceLocked);
        }
        let mut tasks = JoinSet::new();
        for device in self.devices.names() {
            if let Err(e) = self.devices.ensure_available(&device) {
                debug!(device = %device, error = %e, "skipped in broadcast");
                continue;
            }
            let has_command = self
                .profiles
                .tables(&device)
                .map(|t| t.commands.contains(command))
                .unwrap_or(false);
            if !has_command {
                continue;
            }
            let engine = Arc::clone(self);
            let command = command.to_string();
            let args = args.cloned();
            tasks.spawn(async move {
                let result = engine.execute(&device, &command, args.as_ref()).await;
                (device, result)
            });
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((device, Ok(readings))) => {
                    results.insert(device, readings);
                }
                Ok((device, Err(e))) => debug!(device = %device, error = %e, "broadcast failed"),
                Err(e) => warn!(error = %e, "broadcast task failed"),
            }
        }
        info!(command, devices = results.len(), "broadcast finished");
        Ok(results)
    }

    /// Handle spontaneous device data: decode every known field, cache it and
    /// forward the readings in the background.
    pub async fn ingest(&self, message: Message) {
        let identity = self.config.identity_key.as_str();
        let Some(token) = message.get_str(identity) else {
            warn!(key = identity, "inbound message without device identity");
            return;
        };
        let Some(device) = self.devices.find_by_identity(&token) else {
            warn!(device = %token, "data for unknown device");
            return;
        };
        let locked = self
            .devices
            .status(&device)
            .map(|s| s.admin_state == AdminState::Locked)
            .unwrap_or(true);
        if locked || self.devices.is_service_locked() {
            debug!(device = %device, "dropping data for locked device");
            return;
        }
        let Some(tables) = self.profiles.tables(&device) else {
            warn!(device = %device, "no command tables for device");
            return;
        };
        self.metrics.gw.unsolicited.inc();

        let fields: Vec<(String, RawValue)> = message
            .iter()
            .filter(|(k, _)| k.as_str() != identity)
            .filter_map(|(k, _)| message.get_raw(k).map(|v| (k.clone(), v)))
            .collect();
        let mut readings = Vec::new();
        for (field, raw) in fields {
            let objects = tables.objects_for_field(&field);
            if objects.is_empty() {
                debug!(device = %device, field = %field, "no object for field");
                continue;
            }
            for object in objects {
                if let Some(r) = self.decode_reading(&device, object, &object.name, &raw).await {
                    readings.push(r);
                }
            }
        }
        if readings.is_empty() {
            return;
        }
        let forwarder = self.forwarder.clone();
        tokio::spawn(async move {
            forwarder.deliver(&device, readings).await;
        });
    }

    async fn run_leaf(
        self: Arc<Self>,
        device: String,
        address: Address,
        leaf: Leaf,
        value: Option<String>,
        op: String,
    ) {
        self.metrics.gw.leaf_dispatches.inc();
        let wire = leaf.object.wire_name().to_string();
        let mut message = Message::new()
            .with("name", wire.clone())
            .with("cmd", leaf.action.as_str());
        if let Some(value) = value {
            message.insert("param", value);
        }

        match self
            .dispatcher
            .request(&address, message, self.config.command.timeout())
            .await
        {
            Ok(reply) => {
                self.metrics.gw.replies.inc();
                let readings: Vec<Reading> = match reply.get_raw(&wire) {
                    Some(raw) => self
                        .decode_reading(&device, &leaf.object, leaf.reading_name(), &raw)
                        .await
                        .into_iter()
                        .collect(),
                    None => {
                        debug!(device = %device, object = %leaf.object.name, "reply carried no data");
                        Vec::new()
                    }
                };
                if !readings.is_empty() {
                    self.cache
                        .put_response_set(&device, &leaf.signature(), readings.clone());
                }
                self.tracker.complete(&op, readings);
            }
            Err(e) => {
                warn!(device = %device, object = %leaf.object.name, error = %e, "leaf operation failed");
                if matches!(e, GatewayError::SendFailure(_)) {
                    self.metrics.gw.send_failures.inc();
                }
                self.tracker.discard(&op, e);
            }
        }
    }

    /// Cache the raw value and decode it. A failed assertion disables the device
    /// and reports a diagnostic string as the value.
    async fn decode_reading(
        &self,
        device: &str,
        object: &ObjectDescriptor,
        name: &str,
        raw: &RawValue,
    ) -> Option<Reading> {
        let raw = match raw_text(&object.property, raw) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(device, object = %object.name, %raw, error = %e, "undecodable value");
                return None;
            }
        };
        let raw = raw.as_str();
        self.cache.put(device, &object.name, raw);
        let mode = if self.config.data.transform {
            DecodeMode::Transformed
        } else {
            DecodeMode::Raw
        };
        match decode(&object.property, raw, mode) {
            Ok(value) => Some(Reading::new(device, name, value)),
            Err(e) => match e.sentinel() {
                Some(sentinel) => {
                    let failure = GatewayError::AssertionFailure(format!("{}: {e}", object.name));
                    warn!(device, error = %failure, "disabling device");
                    self.forwarder.disable(device).await;
                    Some(Reading::new(device, name, sentinel))
                }
                None => {
                    warn!(device, object = %object.name, raw, error = %e, "undecodable value");
                    None
                }
            },
        }
    }

    async fn write_value(
        &self,
        device: &str,
        address: &Address,
        tables: &DeviceTables,
        leaf: &Leaf,
        args: Option<&Arguments>,
    ) -> Result<String> {
        let prop = &leaf.object.property;
        let param = leaf.op.parameter_name();
        let supplied = args.and_then(|a| a.get(param)).map(String::as_str);
        let arg = resolve_argument(&leaf.op, prop, supplied)
            .ok_or_else(|| GatewayError::BadRequest(format!("no value for {param}")))?;
        if !prop.is_masked() {
            return encode(prop, &arg).map_err(|e| bad_argument(&leaf.object.name, e));
        }

        let current = self.read_current(device, address, &leaf.object).await?;
        let field = field_value(prop, &arg).map_err(|e| bad_argument(&leaf.object.name, e))?;
        let mut raw = masked_merge(prop, field, &current)?;
        for name in &leaf.op.secondary {
            let secondary = tables
                .object(name)
                .ok_or_else(|| GatewayError::not_found("object", name))?;
            let sec_op = ResourceOperation::on_object(Action::Set, name.as_str());
            let supplied = args.and_then(|a| a.get(name)).map(String::as_str);
            let Some(sec_arg) = resolve_argument(&sec_op, &secondary.property, supplied) else {
                continue;
            };
            let field = field_value(&secondary.property, &sec_arg)
                .map_err(|e| bad_argument(name, e))?;
            raw = masked_merge(&secondary.property, field, &raw)?;
        }
        debug!(device, object = %leaf.object.name, current = %current, merged = %raw, "masked write");
        Ok(raw)
    }

    /// Live read of an object's raw register value.
    async fn read_current(
        &self,
        device: &str,
        address: &Address,
        object: &ObjectDescriptor,
    ) -> Result<String> {
        let wire = object.wire_name();
        let message = Message::new().with("name", wire).with("cmd", Action::Get.as_str());
        let reply = self
            .dispatcher
            .request(address, message, self.config.command.timeout())
            .await?;
        let raw = reply.get_raw(wire).ok_or_else(|| {
            GatewayError::SendFailure(format!("no current value for {}", object.name))
        })?;
        let raw = raw_text(&object.property, &raw)?;
        self.cache.put(device, &object.name, raw.clone());
        Ok(raw)
    }
}
