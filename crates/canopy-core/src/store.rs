//! Last-known device state for Canopy.
//!
//! The store maps device identifiers to their most recently seen attribute
//! set. Records are created on first sight and mutated only by merge; no
//! retirement policy exists (operators can watch `canopy_devices_tracked`).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::debug;

/// The last-known state of a single device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    /// Last reported value per attribute name. Includes the `deviceId`
    /// field itself: updates are merged whole, as deployed clients expect.
    pub attributes: Map<String, Value>,
    /// When the record was last merged into.
    pub last_updated: DateTime<Utc>,
}

impl DeviceRecord {
    fn new() -> Self {
        Self {
            attributes: Map::new(),
            last_updated: Utc::now(),
        }
    }

    /// Render the record as a snapshot wire message:
    /// `{"deviceId": ..., <attributes>, "lastUpdated": <RFC 3339>}`.
    ///
    /// The envelope keys are written last so they always win over
    /// same-named attribute keys.
    #[must_use]
    pub fn to_wire(&self, device_id: &str) -> String {
        let mut out = self.attributes.clone();
        out.insert("deviceId".to_string(), Value::String(device_id.to_string()));
        out.insert(
            "lastUpdated".to_string(),
            Value::String(self.last_updated.to_rfc3339()),
        );
        Value::Object(out).to_string()
    }
}

/// Mapping from device identifier to its last-known state.
#[derive(Debug, Default)]
pub struct StateStore {
    devices: DashMap<String, DeviceRecord>,
}

impl StateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an update into a device's record.
    ///
    /// Creates an empty record if the device is unseen, overlays the given
    /// attributes per key (last-write-wins), and stamps `last_updated`.
    /// Returns a clone of the updated record.
    pub fn merge(&self, device_id: &str, attributes: Map<String, Value>) -> DeviceRecord {
        let mut record = self
            .devices
            .entry(device_id.to_string())
            .or_insert_with(|| {
                debug!(device = %device_id, "Tracking new device");
                DeviceRecord::new()
            });

        for (key, value) in attributes {
            record.attributes.insert(key, value);
        }
        record.last_updated = Utc::now();

        record.clone()
    }

    /// Point-in-time contents of the store, in unspecified order.
    ///
    /// Used to replay current state to a newly connected peer.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, DeviceRecord)> {
        self.devices
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Get a device's record, if tracked.
    #[must_use]
    pub fn get(&self, device_id: &str) -> Option<DeviceRecord> {
        self.devices.get(device_id).map(|e| e.value().clone())
    }

    /// Get the number of tracked devices.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_merge_creates_then_overlays() {
        let store = StateStore::new();

        store.merge("S1", attrs(json!({"deviceId": "S1", "temperature": 22.5})));
        let before = store.get("S1").unwrap().last_updated;

        let record = store.merge("S1", attrs(json!({"deviceId": "S1", "humidity": 60})));

        // Key-wise overlay of both updates in arrival order
        assert_eq!(record.attributes.get("temperature"), Some(&json!(22.5)));
        assert_eq!(record.attributes.get("humidity"), Some(&json!(60)));
        assert_eq!(record.attributes.get("deviceId"), Some(&json!("S1")));
        assert!(record.last_updated >= before);
    }

    #[test]
    fn test_merge_last_write_wins_per_key() {
        let store = StateStore::new();
        store.merge("S1", attrs(json!({"temperature": 22.5})));
        let record = store.merge("S1", attrs(json!({"temperature": 23.0})));
        assert_eq!(record.attributes.get("temperature"), Some(&json!(23.0)));
    }

    #[test]
    fn test_snapshot_one_entry_per_device() {
        let store = StateStore::new();
        store.merge("S1", attrs(json!({"temperature": 22.5})));
        store.merge("S2", attrs(json!({"humidity": 60})));
        store.merge("S1", attrs(json!({"temperature": 23.0})));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(store.device_count(), 2);
    }

    #[test]
    fn test_to_wire_envelope_wins() {
        let store = StateStore::new();
        // A malicious or buggy sensor reporting its own lastUpdated
        store.merge(
            "S1",
            attrs(json!({"deviceId": "spoofed", "lastUpdated": "1970-01-01", "soilMoisture": 40})),
        );

        let record = store.get("S1").unwrap();
        let wire: Value = serde_json::from_str(&record.to_wire("S1")).unwrap();

        assert_eq!(wire["deviceId"], json!("S1"));
        assert_ne!(wire["lastUpdated"], json!("1970-01-01"));
        assert_eq!(wire["soilMoisture"], json!(40));
    }
}
