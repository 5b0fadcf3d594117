//! Discovered and connected device views.
//!
//! The registry keeps two maps keyed by address. `discovered` is rebuilt by every scan;
//! `connected` only gains entries on a verified connect and only loses them on a
//! verified disconnect. Reads merge both, with the connected record winning.

use std::collections::{BTreeMap, HashMap};

use crate::types::DeviceRecord;

/// Two-view device registry.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    discovered: HashMap<String, DeviceRecord>,
    connected: HashMap<String, DeviceRecord>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All known devices, sorted by address. Connected records replace discovered ones.
    #[must_use]
    pub fn merged_list(&self) -> Vec<DeviceRecord> {
        let mut merged: BTreeMap<&str, &DeviceRecord> = self
            .discovered
            .iter()
            .map(|(address, record)| (address.as_str(), record))
            .collect();
        merged.extend(
            self.connected
                .iter()
                .map(|(address, record)| (address.as_str(), record)),
        );
        merged.into_values().cloned().collect()
    }

    /// Insert or replace a record in the discovered view.
    pub fn upsert_discovered(&mut self, record: DeviceRecord) {
        self.discovered.insert(record.address.clone(), record);
    }

    /// Insert or replace a record in the connected view.
    pub fn upsert_connected(&mut self, record: DeviceRecord) {
        self.connected.insert(record.address.clone(), record);
    }

    /// Drop `address` from the connected view, returning its last record.
    pub fn remove_connected(&mut self, address: &str) -> Option<DeviceRecord> {
        self.connected.remove(address)
    }

    /// Forget every discovered device. Called at the start of each scan.
    pub fn clear_discovered(&mut self) {
        self.discovered.clear();
    }

    /// Copies of all connected records, sorted by address.
    #[must_use]
    pub fn connected_snapshot(&self) -> Vec<DeviceRecord> {
        let mut records: Vec<DeviceRecord> = self.connected.values().cloned().collect();
        records.sort_by(|a, b| a.address.cmp(&b.address));
        records
    }

    /// Addresses currently in the connected view, sorted.
    #[must_use]
    pub fn connected_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.connected.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Connected record for `address`.
    #[must_use]
    pub fn connected(&self, address: &str) -> Option<&DeviceRecord> {
        self.connected.get(address)
    }

    /// Mutable connected record for `address`.
    pub fn connected_mut(&mut self, address: &str) -> Option<&mut DeviceRecord> {
        self.connected.get_mut(address)
    }

    /// Discovered record for `address`.
    #[must_use]
    pub fn discovered(&self, address: &str) -> Option<&DeviceRecord> {
        self.discovered.get(address)
    }

    /// Merged-view lookup: connected first, then discovered.
    #[must_use]
    pub fn get(&self, address: &str) -> Option<&DeviceRecord> {
        self.connected
            .get(address)
            .or_else(|| self.discovered.get(address))
    }

    /// Whether `address` is in the connected view.
    #[must_use]
    pub fn is_connected(&self, address: &str) -> bool {
        self.connected.contains_key(address)
    }
}
