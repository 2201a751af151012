//! Device registry: the in-memory PAN mirror and its persistence
//!
//! Live devices are held in a concurrent map keyed by IEEE address; every
//! registration and sync is written through to the device store. The
//! registry is the only code path that mutates cluster attribute caches.

use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use corral_store::DevBox;

use crate::af::StatusRecord;
use crate::catalog;
use crate::device::{Addr, Device};
use crate::error::ShepherdError;

pub type DeviceStore = DevBox<Device>;

/// How an attribute update arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrSource {
    /// Read/write response: records gated by their status field
    Response,
    /// Attribute report: values overwrite the cache unconditionally
    Report,
}

pub struct Registry {
    devices: DashMap<String, Device>,
    store: Mutex<DeviceStore>,
}

impl Registry {
    pub fn new(store: DeviceStore) -> Self {
        Self {
            devices: DashMap::new(),
            store: Mutex::new(store),
        }
    }

    /// Look up a device by IEEE or network address. Network lookups scan.
    pub fn find(&self, addr: &Addr) -> Option<Device> {
        match addr {
            Addr::Ieee(ieee) => self.devices.get(ieee).map(|d| d.clone()),
            Addr::Nwk(nwk) => self
                .devices
                .iter()
                .find(|d| d.nwk_addr == *nwk)
                .map(|d| d.clone()),
        }
    }

    /// Run `f` against a device without cloning it.
    pub fn with_device<R>(&self, addr: &Addr, f: impl FnOnce(&Device) -> R) -> Option<R> {
        match addr {
            Addr::Ieee(ieee) => self.devices.get(ieee).map(|d| f(&d)),
            Addr::Nwk(nwk) => self
                .devices
                .iter()
                .find(|d| d.nwk_addr == *nwk)
                .map(|d| f(&d)),
        }
    }

    pub(crate) fn with_device_mut<R>(
        &self,
        addr: &Addr,
        f: impl FnOnce(&mut Device) -> R,
    ) -> Option<R> {
        match addr {
            Addr::Ieee(ieee) => self.devices.get_mut(ieee).map(|mut d| f(&mut d)),
            Addr::Nwk(nwk) => self
                .devices
                .iter_mut()
                .find(|d| d.nwk_addr == *nwk)
                .map(|mut d| f(&mut d)),
        }
    }

    /// Insert a device into the in-memory mirror without persisting it.
    /// Used for the coordinator, which is rebuilt from the radio at start.
    pub(crate) fn adopt(&self, dev: Device) {
        self.devices.insert(dev.ieee_addr.clone(), dev);
    }

    /// Register a device, persisting it to the store.
    ///
    /// New devices get a `join_time` stamp and a fresh store id; recovered
    /// devices are written back under their existing id and lose the
    /// recovered flag. Registering an IEEE address twice is a caller error.
    pub async fn register(&self, mut dev: Device) -> Result<u64, ShepherdError> {
        if self.devices.contains_key(&dev.ieee_addr) {
            return Err(ShepherdError::AlreadyRegistered(dev.ieee_addr));
        }

        let mut store = self.store.lock().await;
        let id = if dev.recovered {
            let id = dev.id.ok_or_else(|| {
                ShepherdError::BadAddress(format!(
                    "recovered device {} has no store id",
                    dev.ieee_addr
                ))
            })?;
            dev.recovered = false;
            store.set(id, dev.clone()).await?
        } else {
            if dev.id.is_some() {
                return Err(ShepherdError::AlreadyRegistered(dev.ieee_addr));
            }
            if dev.join_time.is_none() {
                dev.join_time = Some(chrono::Utc::now().timestamp());
            }
            store.add(dev.clone()).await?
        };
        drop(store);

        dev.id = Some(id);
        tracing::info!(ieee = %dev.ieee_addr, id, "device registered");
        self.devices.insert(dev.ieee_addr.clone(), dev);
        Ok(id)
    }

    /// Load every stored record into the in-memory mirror.
    pub async fn rehydrate(&self) -> Result<usize, ShepherdError> {
        let records = self.store.lock().await.export_all_objs();
        let count = records.len();
        for (id, mut dev) in records {
            dev.id = Some(id);
            dev.recovered = false;
            self.devices.insert(dev.ieee_addr.clone(), dev);
        }
        if count > 0 {
            tracing::info!(count, "rehydrated devices from store");
        }
        Ok(count)
    }

    /// Remove a device from the mirror and the store.
    pub async fn unregister(&self, ieee: &str) -> Result<Device, ShepherdError> {
        let (_, dev) = self
            .devices
            .remove(ieee)
            .ok_or_else(|| ShepherdError::DeviceNotFound(ieee.to_string()))?;
        if let Some(id) = dev.id {
            self.store.lock().await.remove(id).await?;
        }
        tracing::info!(ieee, "device unregistered");
        Ok(dev)
    }

    /// Persist the current state of one device. A device without a store id
    /// (the coordinator) is left alone.
    pub async fn sync_one(&self, ieee: &str) -> Result<(), ShepherdError> {
        let dev = self
            .devices
            .get(ieee)
            .map(|d| d.clone())
            .ok_or_else(|| ShepherdError::DeviceNotFound(ieee.to_string()))?;
        let Some(id) = dev.id else {
            return Ok(());
        };
        self.store.lock().await.set(id, dev).await?;
        Ok(())
    }

    pub fn export_all(&self) -> Vec<Device> {
        self.devices.iter().map(|d| d.clone()).collect()
    }

    /// Drop the in-memory mirror. The store is untouched.
    pub fn clear_all(&self) {
        self.devices.clear();
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Remove every record from the store, then verify it is empty.
    pub async fn wipe_store(&self) -> Result<(), ShepherdError> {
        let mut store = self.store.lock().await;
        for id in store.export_all_ids() {
            store.remove(id).await?;
        }
        if !store.is_empty() {
            return Err(ShepherdError::BadResponse(
                "device store not empty after wipe".to_string(),
            ));
        }
        Ok(())
    }

    /// Fold foundation response or report records into an endpoint's cluster
    /// cache; returns the entries that changed.
    pub(crate) fn apply_attr_records(
        &self,
        ieee: &str,
        ep_id: u8,
        cluster_id: u16,
        cluster_key: &str,
        records: &[StatusRecord],
        source: AttrSource,
    ) -> Result<BTreeMap<String, Value>, ShepherdError> {
        let mut entries = BTreeMap::new();
        for rec in records {
            let name = catalog::attr_key(cluster_id, rec.attr_id);
            let value = match source {
                AttrSource::Response if rec.status != 0 => Value::Null,
                _ => rec.attr_data.clone().unwrap_or(Value::Null),
            };
            entries.insert(name, value);
        }
        self.apply_attr_snapshot(ieee, ep_id, cluster_key, entries)
    }

    /// Merge a full attribute snapshot into the cache; returns the diff.
    pub(crate) fn apply_attr_snapshot(
        &self,
        ieee: &str,
        ep_id: u8,
        cluster_key: &str,
        entries: BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>, ShepherdError> {
        let mut dev = self
            .devices
            .get_mut(ieee)
            .ok_or_else(|| ShepherdError::DeviceNotFound(ieee.to_string()))?;
        let ep = dev
            .endpoints
            .get_mut(&ep_id)
            .ok_or_else(|| ShepherdError::EndpointNotFound {
                addr: ieee.to_string(),
                ep_id,
            })?;
        Ok(ep.merge_attrs(cluster_key, entries))
    }
}
