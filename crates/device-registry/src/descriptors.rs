use crate::types::ValueDescriptor;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Service-wide, append-only set of value descriptors keyed by name.
#[derive(Debug, Default)]
pub struct ValueDescriptorRegistry {
    entries: Mutex<BTreeMap<String, ValueDescriptor>>,
}

impl ValueDescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_descriptors(descriptors: impl IntoIterator<Item = ValueDescriptor>) -> Self {
        let registry = Self::new();
        for d in descriptors {
            registry.insert_if_absent(d);
        }
        registry
    }

    /// Returns true when `desc` was added, false when the name was already taken.
    pub fn insert_if_absent(&self, desc: ValueDescriptor) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&desc.name) {
            return false;
        }
        entries.insert(desc.name.clone(), desc);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<ValueDescriptor> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn all(&self) -> Vec<ValueDescriptor> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
