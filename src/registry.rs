//! Durable map of bridged devices keyed by their stable unique id.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scan::BridgedDevice;

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub unique_id: String,
    #[serde(default)]
    pub node_id: u64,
    #[serde(default)]
    pub endpoint: u16,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_seen_endpoint: u16,
    /// User facing name. Seeded from the node label, sticky after a rename.
    #[serde(rename = "label", default, skip_serializing_if = "String::is_empty")]
    pub user_label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reachable: Option<bool>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub missing: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub hub_node_id: u64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceRecord>,
}

/// Counters returned by [Registry::apply_scan], used for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub seen: usize,
    pub added: usize,
    pub missing: usize,
}

impl Registry {
    pub fn find(&self, unique_id: &str) -> Option<&DeviceRecord> {
        self.devices.get(unique_id)
    }

    /// Reconcile registry with a complete scan of the hub.
    ///
    /// Seen devices get fresh coordinates and lose the missing flag; every other known
    /// device is marked missing. Hub node id and update time are set even for an empty scan.
    pub fn apply_scan(
        &mut self,
        now: DateTime<Utc>,
        hub_node_id: u64,
        devices: &[BridgedDevice],
    ) -> ScanSummary {
        let mut summary = ScanSummary::default();
        let mut seen = HashSet::with_capacity(devices.len());
        for dev in devices {
            if dev.unique_id.is_empty() {
                continue;
            }
            seen.insert(dev.unique_id.as_str());
            let record = self.devices.entry(dev.unique_id.clone()).or_insert_with(|| {
                summary.added += 1;
                DeviceRecord {
                    unique_id: dev.unique_id.clone(),
                    ..Default::default()
                }
            });
            record.node_id = if dev.node_id != 0 { dev.node_id } else { hub_node_id };
            record.endpoint = dev.endpoint;
            record.last_seen_at = Some(now);
            record.last_seen_endpoint = dev.endpoint;
            record.node_label = dev.node_label.clone();
            record.reachable = dev.reachable;
            record.missing = false;
            if record.user_label.is_empty() && !dev.node_label.is_empty() {
                record.user_label = dev.node_label.clone();
            }
        }
        summary.seen = seen.len();

        for (id, record) in self.devices.iter_mut() {
            if !seen.contains(id.as_str()) {
                record.missing = true;
                summary.missing += 1;
            }
        }

        self.hub_node_id = hub_node_id;
        self.updated_at = Some(now);
        summary
    }

    /// Returns false when the device is unknown.
    pub fn set_label(&mut self, unique_id: &str, label: &str) -> bool {
        match self.devices.get_mut(unique_id) {
            Some(record) => {
                record.user_label = label.to_owned();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, unique_id: &str) -> Option<DeviceRecord> {
        self.devices.remove(unique_id)
    }

    /// Unique ids in lexicographic order.
    pub fn sorted_ids(&self) -> Vec<&str> {
        self.devices.keys().map(|k| k.as_str()).collect()
    }
}
