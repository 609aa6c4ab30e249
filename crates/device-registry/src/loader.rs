use crate::types::{Device, DeviceProfile, ValueDescriptor};
use anyhow::Context;
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Profiles, devices and pre-declared value descriptors read from disk.
#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    pub profiles: HashMap<String, DeviceProfile>,
    pub devices: BTreeMap<String, Device>,
    pub value_descriptors: Vec<ValueDescriptor>,
}

impl DeviceRegistry {
    pub fn insert_profile(&mut self, profile: DeviceProfile) {
        self.profiles.insert(profile.name.clone(), profile);
    }

    pub fn insert_device(&mut self, device: Device) {
        self.devices.insert(device.name.clone(), device);
    }

    pub fn profile(&self, name: &str) -> Option<&DeviceProfile> {
        self.profiles.get(name)
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.get(name)
    }

    /// Device with its profile reference replaced by the full catalog profile.
    pub fn resolved_device(&self, name: &str) -> Option<Device> {
        let mut device = self.devices.get(name)?.clone();
        if !device.profile.is_complete() {
            if let Some(full) = self.profiles.get(&device.profile.name) {
                device.profile = full.clone();
            }
        }
        Some(device)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DeviceFile {
    Many { devices: Vec<Device> },
    One(Box<Device>),
}

pub fn load_profile_file(path: impl AsRef<Path>) -> anyhow::Result<DeviceProfile> {
    let path = path.as_ref();
    let val = read_yaml(path)?;
    let profile: DeviceProfile = serde_yaml::from_value(val)
        .with_context(|| format!("decoding profile: {}", path.display()))?;
    Ok(profile)
}

/// A device file holds either one device or a `devices:` list.
pub fn load_device_file(path: impl AsRef<Path>) -> anyhow::Result<Vec<Device>> {
    let path = path.as_ref();
    let val = read_yaml(path)?;
    let file: DeviceFile = serde_yaml::from_value(val)
        .with_context(|| format!("decoding devices: {}", path.display()))?;
    Ok(match file {
        DeviceFile::Many { devices } => devices,
        DeviceFile::One(device) => vec![*device],
    })
}

pub fn load_profiles_dir(dir: impl AsRef<Path>) -> anyhow::Result<DeviceRegistry> {
    let mut reg = DeviceRegistry::default();
    for p in yaml_files(dir.as_ref())? {
        reg.insert_profile(load_profile_file(&p)?);
    }
    Ok(reg)
}

/// Load a catalog directory laid out as `profiles/*.yaml`, `devices/*.yaml` and an
/// optional `value-descriptors.yaml`. Missing subdirectories are treated as empty.
pub fn load_catalog_dir(dir: impl AsRef<Path>) -> anyhow::Result<DeviceRegistry> {
    let dir = dir.as_ref();
    let profiles_dir = dir.join("profiles");
    let mut reg = if profiles_dir.is_dir() {
        load_profiles_dir(&profiles_dir)?
    } else {
        DeviceRegistry::default()
    };

    let devices_dir = dir.join("devices");
    if devices_dir.is_dir() {
        for p in yaml_files(&devices_dir)? {
            for device in load_device_file(&p)? {
                reg.insert_device(device);
            }
        }
    }

    let descriptors = dir.join("value-descriptors.yaml");
    if descriptors.is_file() {
        let val = read_yaml(&descriptors)?;
        reg.value_descriptors = serde_yaml::from_value(val)
            .with_context(|| format!("decoding value descriptors: {}", descriptors.display()))?;
    }

    debug!(
        catalog = %dir.display(),
        profiles = reg.profiles.len(),
        devices = reg.devices.len(),
        "catalog loaded"
    );
    Ok(reg)
}

fn read_yaml(path: &Path) -> anyhow::Result<Value> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading: {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing yaml: {}", path.display()))
}

fn yaml_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("reading directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if let Some(ext) = path.extension() {
            if ext == "yml" || ext == "yaml" {
                entries.push(path);
            }
        }
    }
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_catalog_layout() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("profiles")).unwrap();
        fs::create_dir(dir.path().join("devices")).unwrap();
        fs::write(
            dir.path().join("profiles/door.yaml"),
            "name: door-sensor\ndevice_resources:\n  - name: Door\n    properties:\n      value: { type: i, size: 2 }\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("devices/site.yml"),
            "devices:\n  - name: door-1\n    profile: { name: door-sensor }\n    addressable: { name: door-1, topic: cmd/door-1 }\n  - name: door-2\n    profile: { name: door-sensor }\n    addressable: { name: door-2, topic: cmd/door-2 }\n    admin_state: LOCKED\n",
        )
        .unwrap();
        fs::write(dir.path().join("devices/notes.txt"), "ignored").unwrap();
        fs::write(
            dir.path().join("value-descriptors.yaml"),
            "- { name: Door, type: i }\n",
        )
        .unwrap();

        let reg = load_catalog_dir(dir.path()).unwrap();
        assert_eq!(reg.profiles.len(), 1);
        assert_eq!(reg.devices.len(), 2);
        assert_eq!(reg.value_descriptors.len(), 1);
        assert_eq!(
            reg.device("door-2").map(|d| d.admin_state),
            Some(crate::AdminState::Locked)
        );

        let resolved = reg.resolved_device("door-1").unwrap();
        assert!(resolved.profile.is_complete());
        assert!(!reg.device("door-1").unwrap().profile.is_complete());
    }

    #[test]
    fn single_device_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.yaml");
        fs::write(
            &path,
            "name: pump\nprofile: { name: pump-profile }\naddressable: { name: pump, topic: cmd/pump }\n",
        )
        .unwrap();
        let devices = load_device_file(&path).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].addressable.topic, "cmd/pump");
    }

    #[test]
    fn reports_file_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        fs::write(&path, "name: [unterminated").unwrap();
        let err = load_profile_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("broken.yaml"));
    }
}
