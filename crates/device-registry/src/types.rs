use msg_transport::Address;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Declared type of a device object or value descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[serde(alias = "i", alias = "I", alias = "int", alias = "Integer")]
    Integer,
    #[serde(alias = "f", alias = "F", alias = "Float")]
    Float,
    #[serde(alias = "s", alias = "S", alias = "String")]
    String,
    #[serde(alias = "b", alias = "B", alias = "Bool", alias = "boolean")]
    Bool,
}

impl ValueType {
    pub fn is_numeric(self) -> bool {
        matches!(self, ValueType::Integer | ValueType::Float)
    }

    /// Single-letter code used by value descriptors.
    pub fn code(self) -> char {
        match self {
            ValueType::Integer => 'I',
            ValueType::Float => 'F',
            ValueType::String => 'S',
            ValueType::Bool => 'B',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Least-significant byte first within each word.
    #[serde(alias = "LSB", alias = "little")]
    Lsb,
    /// Most-significant byte first within each word.
    #[serde(alias = "MSB", alias = "big")]
    Msb,
}

/// Bit mask as written in a profile: `0xF0`, `"0xF0"` or `240`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaskSpec {
    Int(u64),
    Text(String),
}

/// Encoding of one object's value, as declared in the profile YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyValue {
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default = "default_read_write")]
    pub read_write: String,
    /// Size in nibbles.
    #[serde(default)]
    pub size: Option<u32>,
    /// Word size in bytes; bytes are reordered within each word.
    #[serde(default)]
    pub word: Option<u32>,
    #[serde(default)]
    pub byte_order: Option<ByteOrder>,
    #[serde(default)]
    pub signed: bool,
    #[serde(default)]
    pub mask: Option<MaskSpec>,
    #[serde(default)]
    pub shift: u32,
    #[serde(default)]
    pub base: f64,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default, deserialize_with = "opt_scalar")]
    pub minimum: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar")]
    pub maximum: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar")]
    pub default_value: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar")]
    pub assertion: Option<String>,
    #[serde(default)]
    pub mappings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Units {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar")]
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectProperties {
    pub value: PropertyValue,
    #[serde(default)]
    pub units: Option<Units>,
}

/// A named point on a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceObject {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    /// Transport attributes; `name` is the field used on the wire.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    pub properties: ObjectProperties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[serde(alias = "read", alias = "GET")]
    Get,
    #[serde(alias = "write", alias = "put", alias = "SET")]
    Set,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Get => "get",
            Action::Set => "set",
        }
    }
}

/// One step of a command: acts on an object, or expands another resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOperation {
    pub operation: Action,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default = "default_property")]
    pub property: String,
    /// Name the value is reported under and looked up by in write arguments.
    #[serde(default)]
    pub parameter: Option<String>,
    /// Literal value written when the caller supplies none.
    #[serde(default, deserialize_with = "opt_scalar")]
    pub default: Option<String>,
    #[serde(default)]
    pub secondary: Vec<String>,
    #[serde(default)]
    pub mappings: BTreeMap<String, String>,
}

impl ResourceOperation {
    pub fn on_object(operation: Action, object: impl Into<String>) -> Self {
        Self {
            operation,
            object: Some(object.into()),
            resource: None,
            property: default_property(),
            parameter: None,
            default: None,
            secondary: Vec::new(),
            mappings: BTreeMap::new(),
        }
    }

    pub fn parameter_name(&self) -> &str {
        self.parameter
            .as_deref()
            .or(self.object.as_deref())
            .or(self.resource.as_deref())
            .unwrap_or_default()
    }
}

/// Explicit get/set operation lists for a named resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileResource {
    pub name: String,
    #[serde(default)]
    pub get: Vec<ResourceOperation>,
    #[serde(default)]
    pub set: Vec<ResourceOperation>,
}

/// A command exposed to callers, listing the value descriptors it reads or writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileCommand {
    pub name: String,
    #[serde(default)]
    pub expected_values: Vec<String>,
    #[serde(default)]
    pub parameter_names: Vec<String>,
}

impl ProfileCommand {
    pub fn associated_value_descriptors(&self) -> impl Iterator<Item = &str> {
        self.expected_values
            .iter()
            .chain(self.parameter_names.iter())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub name: String,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Absent when the profile is only a reference and must be fetched in full.
    #[serde(default)]
    pub device_resources: Option<Vec<DeviceObject>>,
    #[serde(default)]
    pub resources: Vec<ProfileResource>,
    #[serde(default)]
    pub commands: Vec<ProfileCommand>,
}

impl DeviceProfile {
    pub fn reference(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            manufacturer: None,
            model: None,
            description: None,
            labels: Vec::new(),
            device_resources: None,
            resources: Vec::new(),
            commands: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.device_resources.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AdminState {
    #[serde(alias = "LOCKED")]
    Locked,
    #[default]
    #[serde(alias = "UNLOCKED")]
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperatingState {
    #[default]
    #[serde(alias = "ENABLED")]
    Enabled,
    #[serde(alias = "DISABLED")]
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub profile: DeviceProfile,
    pub addressable: Address,
    #[serde(default)]
    pub admin_state: AdminState,
    #[serde(default)]
    pub operating_state: OperatingState,
}

/// Service-wide description of a reading name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueDescriptor {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub minimum: Option<String>,
    #[serde(default)]
    pub maximum: Option<String>,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default = "default_formatting")]
    pub formatting: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_read_write() -> String {
    "rw".to_string()
}

fn default_scale() -> f64 {
    1.0
}

fn default_property() -> String {
    "value".to_string()
}

fn default_formatting() -> String {
    "%s".to_string()
}

/// Accept any YAML/JSON scalar where a textual value is expected.
fn opt_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        Some(other) => Some(other.to_string()),
    })
}
