use crate::descriptors::ValueDescriptorRegistry;
use crate::error::ProfileError;
use crate::property::PropertyDescriptor;
use crate::types::{Action, DeviceObject, DeviceProfile, ResourceOperation, ValueDescriptor};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// A compiled device object: its wire attributes plus validated property.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub attributes: BTreeMap<String, Value>,
    pub units: Option<String>,
    pub property: PropertyDescriptor,
}

impl ObjectDescriptor {
    /// Field name used on the wire; the `name` attribute, else the object name.
    pub fn wire_name(&self) -> &str {
        match self.attributes.get("name") {
            Some(Value::String(s)) => s,
            _ => &self.name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOps {
    pub get: Vec<ResourceOperation>,
    pub set: Vec<ResourceOperation>,
}

impl CommandOps {
    pub fn for_action(&self, action: Action) -> &[ResourceOperation] {
        match action {
            Action::Get => &self.get,
            Action::Set => &self.set,
        }
    }
}

/// Command name (case-insensitive) to its get/set operation lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandTable {
    entries: HashMap<String, CommandOps>,
}

impl CommandTable {
    pub fn insert(&mut self, name: &str, ops: CommandOps) {
        self.entries.insert(name.to_lowercase(), ops);
    }

    pub fn get(&self, name: &str) -> Option<&CommandOps> {
        self.entries.get(&name.to_lowercase())
    }

    /// Operation list for `name` and `action`; empty lists read as absent.
    pub fn resolve(&self, name: &str, action: Action) -> Option<&[ResourceOperation]> {
        self.get(name)
            .map(|ops| ops.for_action(action))
            .filter(|ops| !ops.is_empty())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_lowercase())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn operations(&self) -> impl Iterator<Item = &ResourceOperation> {
        self.entries
            .values()
            .flat_map(|ops| ops.get.iter().chain(ops.set.iter()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything the command engine needs for one device, swapped as a unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceTables {
    pub profile: String,
    pub commands: CommandTable,
    pub objects: HashMap<String, Arc<ObjectDescriptor>>,
}

impl DeviceTables {
    pub fn object(&self, name: &str) -> Option<&Arc<ObjectDescriptor>> {
        self.objects.get(name)
    }

    /// Every object carried by a wire field, matched case-insensitively on the
    /// wire name or the object name, ordered by object name.
    pub fn objects_for_field(&self, field: &str) -> Vec<&Arc<ObjectDescriptor>> {
        let mut found: Vec<_> = self
            .objects
            .values()
            .filter(|o| {
                o.wire_name().eq_ignore_ascii_case(field) || o.name.eq_ignore_ascii_case(field)
            })
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }
}

#[derive(Debug)]
pub struct Compiled {
    pub tables: DeviceTables,
    /// Value descriptors this compilation added to the registry.
    pub registered: Vec<ValueDescriptor>,
}

/// Build the command table and object map for `profile`.
///
/// Fails with [`ProfileError::Incomplete`] when the profile carries no device
/// resources; the caller is expected to fetch the full profile and retry once.
pub fn compile_profile(
    profile: &DeviceProfile,
    registry: &ValueDescriptorRegistry,
) -> Result<Compiled, ProfileError> {
    let objects_in = profile
        .device_resources
        .as_ref()
        .ok_or_else(|| ProfileError::Incomplete(profile.name.clone()))?;

    let mut commands = CommandTable::default();
    for res in &profile.resources {
        for op in res.get.iter().chain(res.set.iter()) {
            if op.object.is_some() == op.resource.is_some() {
                return Err(ProfileError::InvalidOperation {
                    resource: res.name.clone(),
                });
            }
        }
        if commands.contains(&res.name) {
            warn!(profile = %profile.name, resource = %res.name, "duplicate resource, last one wins");
        }
        commands.insert(
            &res.name,
            CommandOps {
                get: res.get.clone(),
                set: res.set.clone(),
            },
        );
    }

    let mut objects = HashMap::with_capacity(objects_in.len());
    for obj in objects_in {
        let compiled = compile_object(obj)?;
        if !commands.contains(&obj.name) {
            let mut ops = CommandOps::default();
            if compiled.property.access.read {
                ops.get.push(ResourceOperation::on_object(Action::Get, &obj.name));
            }
            if compiled.property.access.write {
                ops.set.push(ResourceOperation::on_object(Action::Set, &obj.name));
            }
            commands.insert(&obj.name, ops);
        }
        objects.insert(obj.name.clone(), Arc::new(compiled));
    }

    check_cycles(&commands)?;
    let registered = register_descriptors(profile, &commands, &objects, registry);
    debug!(
        profile = %profile.name,
        commands = commands.len(),
        objects = objects.len(),
        registered = registered.len(),
        "profile compiled"
    );

    Ok(Compiled {
        tables: DeviceTables {
            profile: profile.name.clone(),
            commands,
            objects,
        },
        registered,
    })
}

fn compile_object(obj: &DeviceObject) -> Result<ObjectDescriptor, ProfileError> {
    let units = obj.properties.units.as_ref().and_then(|u| u.default_value.clone());
    Ok(ObjectDescriptor {
        name: obj.name.clone(),
        description: obj.description.clone(),
        attributes: obj.attributes.clone(),
        units,
        property: PropertyDescriptor::compile(&obj.name, &obj.properties.value)?,
    })
}

fn register_descriptors(
    profile: &DeviceProfile,
    commands: &CommandTable,
    objects: &HashMap<String, Arc<ObjectDescriptor>>,
    registry: &ValueDescriptorRegistry,
) -> Vec<ValueDescriptor> {
    let used: HashSet<&str> = profile
        .commands
        .iter()
        .flat_map(|c| c.associated_value_descriptors())
        .collect();

    let mut registered = Vec::new();
    for op in commands.operations() {
        let name = op.parameter_name();
        if !used.contains(name) || registry.contains(name) {
            continue;
        }
        let Some(object) = op.object.as_deref().and_then(|o| objects.get(o)) else {
            continue;
        };
        let desc = ValueDescriptor {
            id: None,
            name: name.to_string(),
            value_type: object.property.value_type,
            minimum: object.property.minimum.clone(),
            maximum: object.property.maximum.clone(),
            default_value: object.property.default_value.clone(),
            units: object.units.clone(),
            formatting: "%s".to_string(),
            description: object.description.clone(),
        };
        if registry.insert_if_absent(desc.clone()) {
            registered.push(desc);
        }
    }
    registered
}

/// Reject resource references that loop back on themselves.
fn check_cycles(commands: &CommandTable) -> Result<(), ProfileError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        name: &str,
        commands: &CommandTable,
        marks: &mut HashMap<String, Mark>,
        path: &mut Vec<String>,
    ) -> Result<(), ProfileError> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|p| p == name).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(name.to_string());
                return Err(ProfileError::ResourceCycle { path: cycle });
            }
            None => {}
        }
        let Some(ops) = commands.get(name) else {
            return Ok(());
        };
        marks.insert(name.to_string(), Mark::Visiting);
        path.push(name.to_string());
        for op in ops.get.iter().chain(ops.set.iter()) {
            if let Some(next) = &op.resource {
                visit(&next.to_lowercase(), commands, marks, path)?;
            }
        }
        path.pop();
        marks.insert(name.to_string(), Mark::Done);
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut names: Vec<&str> = commands.names().collect();
    names.sort_unstable();
    for name in names {
        visit(name, commands, &mut marks, &mut Vec::new())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"
name: door-sensor
device_resources:
  - name: Door
    attributes: { name: door }
    properties:
      value: { type: i, read_write: rw, size: 4, mask: "0xF0", shift: 4 }
  - name: Temperature
    attributes: { name: temp }
    properties:
      value: { type: i, read_write: r, size: 4, scale: 0.1, minimum: -40, maximum: 125 }
      units: { type: String, default_value: degC }
  - name: Status
    properties:
      value: { type: s, read_write: r }
resources:
  - name: Climate
    get:
      - { operation: get, object: Temperature }
      - { operation: get, resource: Status }
commands:
  - name: Door
    expected_values: [Door]
    parameter_names: [Door]
  - name: Climate
    expected_values: [Temperature]
"#;

    fn profile(yaml: &str) -> DeviceProfile {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn synthesizes_resources_from_access() {
        let reg = ValueDescriptorRegistry::new();
        let compiled = compile_profile(&profile(PROFILE), &reg).unwrap();
        let table = &compiled.tables.commands;

        let door = table.get("door").unwrap();
        assert_eq!(door.get, vec![ResourceOperation::on_object(Action::Get, "Door")]);
        assert_eq!(door.set, vec![ResourceOperation::on_object(Action::Set, "Door")]);
        assert!(table.resolve("DOOR", Action::Set).is_some());

        assert!(table.resolve("temperature", Action::Get).is_some());
        assert!(table.resolve("temperature", Action::Set).is_none());
        assert_eq!(table.resolve("climate", Action::Get).map(|ops| ops.len()), Some(2));
        assert_eq!(
            compiled.tables.object("Door").map(|o| o.wire_name()),
            Some("door")
        );
        let temp: Vec<_> = compiled.tables.objects_for_field("TEMP");
        assert_eq!(temp.len(), 1);
        assert_eq!(temp[0].name, "Temperature");
    }

    #[test]
    fn shared_wire_field_matches_every_object() {
        let yaml = PROFILE.replace(
            "  - name: Temperature\n",
            "  - name: Latch\n    attributes: { name: door }\n    properties:\n      value: { type: i, read_write: rw, size: 4, mask: \"0x0F\" }\n  - name: Temperature\n",
        );
        let reg = ValueDescriptorRegistry::new();
        let compiled = compile_profile(&profile(&yaml), &reg).unwrap();
        for _ in 0..5 {
            let names: Vec<&str> = compiled
                .tables
                .objects_for_field("door")
                .iter()
                .map(|o| o.name.as_str())
                .collect();
            assert_eq!(names, ["Door", "Latch"]);
        }
        assert!(compiled.tables.objects_for_field("nope").is_empty());
    }

    #[test]
    fn registers_only_used_parameters() {
        let reg = ValueDescriptorRegistry::new();
        let compiled = compile_profile(&profile(PROFILE), &reg).unwrap();
        let mut names: Vec<_> = compiled.registered.iter().map(|d| d.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, ["Door", "Temperature"]);

        let temp = reg.get("Temperature").unwrap();
        assert_eq!(temp.minimum.as_deref(), Some("-40"));
        assert_eq!(temp.units.as_deref(), Some("degC"));
        assert!(!reg.contains("Status"));

        let again = compile_profile(&profile(PROFILE), &reg).unwrap();
        assert!(again.registered.is_empty());
    }

    #[test]
    fn incomplete_profile_needs_refetch() {
        let reg = ValueDescriptorRegistry::new();
        let err = compile_profile(&DeviceProfile::reference("door-sensor"), &reg).unwrap_err();
        assert_eq!(err, ProfileError::Incomplete("door-sensor".into()));
    }

    #[test]
    fn rejects_resource_cycles() {
        let yaml = r#"
name: loop
device_resources: []
resources:
  - name: A
    get: [{ operation: get, resource: B }]
  - name: B
    get: [{ operation: get, resource: a }]
"#;
        let err = compile_profile(&profile(yaml), &ValueDescriptorRegistry::new()).unwrap_err();
        assert!(matches!(err, ProfileError::ResourceCycle { .. }), "{err}");
    }

    #[test]
    fn undefined_references_still_compile() {
        let yaml = r#"
name: dangling
device_resources: []
resources:
  - name: A
    get: [{ operation: get, resource: Missing }, { operation: get, object: Ghost }]
"#;
        assert!(compile_profile(&profile(yaml), &ValueDescriptorRegistry::new()).is_ok());
    }

    #[test]
    fn operation_must_target_one_thing() {
        let yaml = r#"
name: bad
device_resources: []
resources:
  - name: A
    get: [{ operation: get, object: X, resource: Y }]
"#;
        let err = compile_profile(&profile(yaml), &ValueDescriptorRegistry::new()).unwrap_err();
        assert!(matches!(err, ProfileError::InvalidOperation { .. }));
    }
}
