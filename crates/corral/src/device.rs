//! PAN data model: devices, endpoints, cluster attribute caches

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Zigbee device types (network role)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Coordinator,
    Router,
    EndDevice,
    Unknown,
}

/// Reachability of a device as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

/// A device address: IEEE hex string (`0x…`) or 16-bit network address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addr {
    Ieee(String),
    Nwk(u16),
}

impl From<&str> for Addr {
    fn from(s: &str) -> Self {
        Addr::Ieee(s.to_string())
    }
}

impl From<String> for Addr {
    fn from(s: String) -> Self {
        Addr::Ieee(s)
    }
}

impl From<u16> for Addr {
    fn from(nwk: u16) -> Self {
        Addr::Nwk(nwk)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addr::Ieee(s) => f.write_str(s),
            Addr::Nwk(n) => write!(f, "{n:#06x}"),
        }
    }
}

/// Endpoint metadata as reported by the radio: profile, device id, and the
/// input/output cluster lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleDescriptor {
    pub ep_id: u8,
    pub profile_id: u16,
    pub device_id: u16,
    pub in_clusters: Vec<u16>,
    pub out_clusters: Vec<u16>,
}

/// An addressable logical unit on a device.
///
/// `clusters` is the last-known attribute cache: cluster key → attribute
/// name → value. Keys come from the catalog; unknown ids stay decimal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: u8,
    pub profile_id: u16,
    pub device_id: u16,
    pub in_clusters: Vec<u16>,
    pub out_clusters: Vec<u16>,
    /// Hosted on the coordinator (a Coordpoint)
    #[serde(default)]
    pub local: bool,
    #[serde(default)]
    pub clusters: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Endpoint {
    pub fn from_descriptor(sd: &SimpleDescriptor) -> Self {
        Self {
            id: sd.ep_id,
            profile_id: sd.profile_id,
            device_id: sd.device_id,
            in_clusters: sd.in_clusters.clone(),
            out_clusters: sd.out_clusters.clone(),
            local: false,
            clusters: BTreeMap::new(),
        }
    }

    /// A Coordpoint: an endpoint hosted on the coordinator.
    pub fn local_from_descriptor(sd: &SimpleDescriptor) -> Self {
        Self {
            local: true,
            ..Self::from_descriptor(sd)
        }
    }

    pub fn has_cluster(&self, cluster_id: u16) -> bool {
        self.in_clusters.contains(&cluster_id) || self.out_clusters.contains(&cluster_id)
    }

    /// Last-known attribute values of one cluster.
    pub fn cluster_attrs(&self, cluster_key: &str) -> Option<&BTreeMap<String, Value>> {
        self.clusters.get(cluster_key)
    }

    /// Merge `entries` into the cluster cache, returning the entries that
    /// actually changed. An absent attribute counts as null, so storing a
    /// null over nothing is not a change.
    pub(crate) fn merge_attrs(
        &mut self,
        cluster_key: &str,
        entries: BTreeMap<String, Value>,
    ) -> BTreeMap<String, Value> {
        let cache = self.clusters.entry(cluster_key.to_string()).or_default();
        let mut diff = BTreeMap::new();
        for (name, value) in entries {
            let prior = cache.get(&name).cloned().unwrap_or(Value::Null);
            if prior != value {
                diff.insert(name.clone(), value.clone());
            }
            cache.insert(name, value);
        }
        diff
    }
}

/// A device on the PAN.
///
/// Identified by its immutable IEEE address; the network address may change
/// over the device's lifetime. `id` is the persistence id assigned by the
/// store on first registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    #[serde(skip)]
    pub id: Option<u64>,
    pub ieee_addr: String,
    pub nwk_addr: u16,
    pub device_type: DeviceType,
    pub status: DeviceStatus,
    /// Unix seconds, stamped at registration
    pub join_time: Option<i64>,
    /// Interview did not finish; hidden from default listings
    #[serde(default)]
    pub incomplete: bool,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub power_source: Option<String>,
    #[serde(default)]
    pub endpoints: BTreeMap<u8, Endpoint>,
    /// Rehydrated from the store at startup
    #[serde(skip)]
    pub recovered: bool,
}

impl Device {
    pub fn new(ieee_addr: impl Into<String>, nwk_addr: u16) -> Self {
        Self {
            id: None,
            ieee_addr: ieee_addr.into(),
            nwk_addr,
            device_type: DeviceType::Unknown,
            status: DeviceStatus::Offline,
            join_time: None,
            incomplete: false,
            manufacturer: None,
            model: None,
            power_source: None,
            endpoints: BTreeMap::new(),
            recovered: false,
        }
    }

    /// Endpoint ids in ascending order. Always in step with the endpoint
    /// map, since it is derived from it.
    pub fn ep_list(&self) -> Vec<u8> {
        self.endpoints.keys().copied().collect()
    }

    pub fn endpoint(&self, ep_id: u8) -> Option<&Endpoint> {
        self.endpoints.get(&ep_id)
    }

    pub fn is_coordinator(&self) -> bool {
        self.device_type == DeviceType::Coordinator
    }

    /// The delegator Coordpoint for a profile: a local endpoint in the
    /// reserved 1–10 range carrying that profile id.
    pub fn delegator_for(&self, profile_id: u16) -> Option<&Endpoint> {
        self.endpoints
            .values()
            .find(|ep| ep.local && (1..=10).contains(&ep.id) && ep.profile_id == profile_id)
    }

    /// The `list()` dump: everything but the store id and endpoint bodies.
    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            ieee_addr: self.ieee_addr.clone(),
            nwk_addr: self.nwk_addr,
            device_type: self.device_type,
            status: self.status,
            join_time: self.join_time,
            incomplete: self.incomplete,
            manufacturer: self.manufacturer.clone(),
            model: self.model.clone(),
            power_source: self.power_source.clone(),
            ep_list: self.ep_list(),
        }
    }
}

/// Listing dump of a device, endpoint ids only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub ieee_addr: String,
    pub nwk_addr: u16,
    pub device_type: DeviceType,
    pub status: DeviceStatus,
    pub join_time: Option<i64>,
    pub incomplete: bool,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub power_source: Option<String>,
    pub ep_list: Vec<u8>,
}
