use crate::types::Reading;
use dashmap::DashMap;
use std::collections::VecDeque;

/// Recent raw values per (device, object), and the last reading set per
/// (device, operation signature). Both maps are sharded.
#[derive(Debug)]
pub struct ReadingCache {
    capacity: usize,
    values: DashMap<(String, String), VecDeque<String>>,
    responses: DashMap<(String, Vec<String>), Vec<Reading>>,
}

impl ReadingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            values: DashMap::new(),
            responses: DashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Newest first; the oldest value is dropped once capacity is exceeded.
    pub fn put(&self, device: &str, object: &str, raw: impl Into<String>) {
        let mut history = self
            .values
            .entry((device.to_string(), object.to_string()))
            .or_default();
        history.push_front(raw.into());
        history.truncate(self.capacity);
    }

    pub fn get(&self, device: &str, object: &str) -> Option<String> {
        self.values
            .get(&(device.to_string(), object.to_string()))
            .and_then(|h| h.front().cloned())
    }

    pub fn history(&self, device: &str, object: &str) -> Vec<String> {
        self.values
            .get(&(device.to_string(), object.to_string()))
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn put_response_set(&self, device: &str, signature: &[String], readings: Vec<Reading>) {
        self.responses
            .insert((device.to_string(), signature.to_vec()), readings);
    }

    pub fn get_response_set(&self, device: &str, signature: &[String]) -> Option<Vec<Reading>> {
        self.responses
            .get(&(device.to_string(), signature.to_vec()))
            .map(|r| r.clone())
    }

    pub fn clear_device(&self, device: &str) {
        self.values.retain(|(d, _), _| d != device);
        self.responses.retain(|(d, _), _| d != device);
    }
}
