//! The shepherd: stateful façade over the radio and the PAN mirror
//!
//! Owns the device registry, serialises lifecycle operations, multiplexes
//! application requests onto the radio channel, and fans radio indications
//! out as one typed event stream.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU16, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use serde::Serialize;

use crate::af::{AfLayer, ZclKind};
use crate::catalog;
use crate::config::ShepherdConfig;
use crate::controller::{
    Controller, ControllerEvent, DeviceInfo, FirmwareInfo, JoinScope, NetInfo, RemoveConfig,
    ResetMode,
};
use crate::device::{Addr, Device, DeviceStatus, DeviceSummary, DeviceType, Endpoint};
use crate::error::ShepherdError;
use crate::event::{Ind, InterviewStatus, ShepherdEvent};
use crate::registry::{AttrSource, DeviceStore, Registry};
use crate::request::{AppHandle, EndpointHandle};
use crate::topology::{LqiRecord, NeighborLqi, RoutingEntry};
use crate::zapp::ZApp;
use crate::{mount, topology};

/// Decides whether joining devices are admitted. Both hooks default to
/// unconditional accept; swap the policy at runtime with
/// [`Shepherd::set_admission_policy`].
#[async_trait]
pub trait AdmissionPolicy: Send + Sync {
    /// Asked when a device announces itself, before its interview.
    async fn accept_device(&self, info: &DeviceInfo) -> bool {
        let _ = info;
        true
    }

    /// Asked when the interview finished, before registration.
    async fn accept_interview(&self, info: &DeviceInfo) -> bool {
        let _ = info;
        true
    }
}

/// The default policy: every device is welcome.
pub struct AcceptAll;

#[async_trait]
impl AdmissionPolicy for AcceptAll {}

/// `info()` snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ShepherdInfo {
    pub enabled: bool,
    pub net: NetInfo,
    pub firmware: FirmwareInfo,
    pub start_time: Option<i64>,
    pub join_time_left: u16,
}

pub(crate) struct MountedApp {
    pub(crate) app: Arc<dyn ZApp>,
    pub(crate) ep_id: u8,
}

pub(crate) struct ShepherdInner {
    pub(crate) controller: Arc<dyn Controller>,
    pub(crate) af: Arc<dyn AfLayer>,
    pub(crate) registry: Registry,
    pub(crate) config: ShepherdConfig,
    pub(crate) event_tx: broadcast::Sender<ShepherdEvent>,
    pub(crate) enabled: AtomicBool,
    pub(crate) start_time: AtomicI64,
    pub(crate) join_time_left: AtomicU16,
    pub(crate) coord_ieee: RwLock<Option<String>>,
    /// Fair queue: mounts acquire this for their whole duration
    pub(crate) mount_lock: Mutex<()>,
    pub(crate) apps: RwLock<Vec<MountedApp>>,
    policy: RwLock<Arc<dyn AdmissionPolicy>>,
    dispatcher: StdMutex<Option<JoinHandle<()>>>,
}

impl ShepherdInner {
    pub(crate) fn emit(&self, event: ShepherdEvent) {
        let _ = self.event_tx.send(event);
    }

    pub(crate) fn coord_ieee(&self) -> Option<String> {
        self.coord_ieee.read().expect("coord_ieee lock").clone()
    }

    pub(crate) fn coordinator(&self) -> Option<Device> {
        let ieee = self.coord_ieee()?;
        self.registry.find(&Addr::Ieee(ieee))
    }
}

/// The public façade.
pub struct Shepherd {
    inner: Arc<ShepherdInner>,
}

impl Shepherd {
    pub fn new(
        controller: Arc<dyn Controller>,
        af: Arc<dyn AfLayer>,
        store: DeviceStore,
        config: ShepherdConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(ShepherdInner {
                controller,
                af,
                registry: Registry::new(store),
                config,
                event_tx,
                enabled: AtomicBool::new(false),
                start_time: AtomicI64::new(0),
                join_time_left: AtomicU16::new(0),
                coord_ieee: RwLock::new(None),
                mount_lock: Mutex::new(()),
                apps: RwLock::new(Vec::new()),
                policy: RwLock::new(Arc::new(AcceptAll)),
                dispatcher: StdMutex::new(None),
            }),
        }
    }

    /// Construct with the device store opened at `config.db_path`.
    pub async fn open(
        controller: Arc<dyn Controller>,
        af: Arc<dyn AfLayer>,
        config: ShepherdConfig,
    ) -> Result<Self, ShepherdError> {
        let store = DeviceStore::open(&config.db_path).await?;
        Ok(Self::new(controller, af, store, config))
    }

    /// Subscribe to the external event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ShepherdEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn set_admission_policy(&self, policy: Arc<dyn AdmissionPolicy>) {
        *self.inner.policy.write().expect("policy lock") = policy;
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Bring up the radio and the PAN mirror.
    ///
    /// Opens the transport, pushes NV parameters, rebuilds the coordinator
    /// device from the radio, rehydrates persisted devices, and starts the
    /// indication dispatcher. Emits `Ready` unless `quiet_start` is set.
    /// Calling `start` while enabled is an error.
    pub async fn start(&self) -> Result<(), ShepherdError> {
        let inner = &self.inner;
        if inner.enabled.load(Ordering::SeqCst) {
            return Err(ShepherdError::AlreadyStarted);
        }

        inner.controller.start().await?;
        inner.controller.set_nv_params(&inner.config.net).await?;

        let info = inner.controller.coordinator().await?;
        inner.registry.rehydrate().await?;

        let mut coord = Device::new(info.ieee_addr.clone(), info.nwk_addr);
        coord.device_type = DeviceType::Coordinator;
        coord.status = DeviceStatus::Online;
        coord.manufacturer = info.manufacturer.clone();
        coord.model = info.model.clone();
        coord.power_source = info.power_source.clone();
        for sd in &info.endpoints {
            coord
                .endpoints
                .insert(sd.ep_id, Endpoint::local_from_descriptor(sd));
        }
        // reconcile the radio's endpoint table with what it reported
        for ep in coord.endpoints.values() {
            inner.controller.register_ep(ep).await?;
        }
        inner.registry.adopt(coord);
        *inner.coord_ieee.write().expect("coord_ieee lock") = Some(info.ieee_addr.clone());

        self.spawn_dispatcher();

        inner.enabled.store(true, Ordering::SeqCst);
        inner
            .start_time
            .store(chrono::Utc::now().timestamp(), Ordering::SeqCst);
        tracing::info!(coord = %info.ieee_addr, "shepherd started");

        if !inner.config.quiet_start {
            inner.emit(ShepherdEvent::Ready);
        }
        Ok(())
    }

    /// Tear down: drop the in-memory mirror (the store stays), unmount every
    /// app, close the transport. A no-op when already stopped.
    pub async fn stop(&self) -> Result<(), ShepherdError> {
        let inner = &self.inner;
        if !inner.enabled.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(handle) = inner.dispatcher.lock().expect("dispatcher lock").take() {
            handle.abort();
        }
        inner.registry.clear_all();
        inner.apps.write().expect("apps lock").clear();
        *inner.coord_ieee.write().expect("coord_ieee lock") = None;
        inner.join_time_left.store(0, Ordering::SeqCst);
        inner.controller.close().await?;
        tracing::info!("shepherd stopped");
        Ok(())
    }

    /// Reset the radio. [`ResetMode::Hard`] additionally wipes the persisted
    /// store; store failures are logged and the radio reset is still issued.
    /// A soft reset touches neither the store nor the in-memory mirror.
    pub async fn reset(&self, mode: ResetMode) -> Result<(), ShepherdError> {
        if mode == ResetMode::Hard {
            if let Err(e) = self.inner.registry.wipe_store().await {
                tracing::warn!(error = %e, "store wipe failed during hard reset");
            }
        }
        self.inner.controller.reset(mode).await
    }

    /// Open a join window for `seconds`. Countdown ticks surface as
    /// [`ShepherdEvent::PermitJoining`].
    pub async fn permit_join(
        &self,
        seconds: u16,
        scope: JoinScope,
    ) -> Result<(), ShepherdError> {
        if !self.inner.enabled.load(Ordering::SeqCst) {
            return Err(ShepherdError::NotEnabled);
        }
        self.inner.controller.permit_join(seconds, scope).await
    }

    /// Runtime snapshot: network parameters, firmware, uptime.
    pub async fn info(&self) -> Result<ShepherdInfo, ShepherdError> {
        let net = self.inner.controller.net_info().await?;
        let firmware = self.inner.controller.firmware_info().await?;
        let start_time = self.inner.start_time.load(Ordering::SeqCst);
        Ok(ShepherdInfo {
            enabled: self.inner.enabled.load(Ordering::SeqCst),
            net,
            firmware,
            start_time: (start_time != 0).then_some(start_time),
            join_time_left: self.inner.join_time_left.load(Ordering::SeqCst),
        })
    }

    /// Enrolled devices in store order. Interview-incomplete devices are
    /// hidden unless `show_incomplete`; the coordinator is surfaced through
    /// [`Shepherd::info`] instead.
    pub fn list(&self, show_incomplete: bool) -> Vec<DeviceSummary> {
        let mut devs: Vec<Device> = self
            .inner
            .registry
            .export_all()
            .into_iter()
            .filter(|d| !d.is_coordinator())
            .filter(|d| show_incomplete || !d.incomplete)
            .collect();
        devs.sort_by_key(|d| d.id.unwrap_or(u64::MAX));
        devs.iter().map(Device::summary).collect()
    }

    /// Look up specific devices; unknown addresses keep their slot as
    /// `None`.
    pub fn list_addrs(&self, addrs: &[&str]) -> Vec<Option<DeviceSummary>> {
        addrs
            .iter()
            .map(|a| {
                self.inner
                    .registry
                    .find(&Addr::from(*a))
                    .map(|d| d.summary())
            })
            .collect()
    }

    /// Device by IEEE or network address, then endpoint by id.
    pub fn find(&self, addr: impl Into<Addr>, ep_id: u8) -> Option<Endpoint> {
        self.inner
            .registry
            .with_device(&addr.into(), |d| d.endpoint(ep_id).cloned())
            .flatten()
    }

    /// ZCL capability handle for a remote endpoint.
    pub fn endpoint(
        &self,
        addr: impl Into<Addr>,
        ep_id: u8,
    ) -> Result<EndpointHandle, ShepherdError> {
        let addr = addr.into();
        let dev = self
            .inner
            .registry
            .find(&addr)
            .ok_or_else(|| ShepherdError::DeviceNotFound(addr.to_string()))?;
        if dev.endpoint(ep_id).is_none() {
            return Err(ShepherdError::EndpointNotFound {
                addr: dev.ieee_addr,
                ep_id,
            });
        }
        Ok(EndpointHandle::new(
            Arc::clone(&self.inner),
            dev.ieee_addr,
            ep_id,
        ))
    }

    /// Register a local application on a fresh coordinator endpoint.
    /// Mounts are strictly serialised; concurrent calls drain in FIFO order.
    pub async fn mount(&self, app: Arc<dyn ZApp>) -> Result<AppHandle, ShepherdError> {
        mount::mount(&self.inner, app).await
    }

    /// Ask a device to leave the PAN. Registry removal follows on the leave
    /// indication.
    pub async fn remove(
        &self,
        addr: impl Into<Addr>,
        cfg: RemoveConfig,
    ) -> Result<(), ShepherdError> {
        let addr = addr.into();
        let dev = self
            .inner
            .registry
            .find(&addr)
            .ok_or_else(|| ShepherdError::DeviceNotFound(addr.to_string()))?;
        self.inner.controller.remove(&dev.ieee_addr, cfg).await
    }

    /// Single-hop neighbour table of a device.
    pub async fn lqi(&self, addr: impl Into<Addr>) -> Result<Vec<NeighborLqi>, ShepherdError> {
        topology::lqi(&self.inner, &addr.into()).await
    }

    /// Routing table of a device, inactive routes dropped.
    pub async fn rtg(&self, addr: impl Into<Addr>) -> Result<Vec<RoutingEntry>, ShepherdError> {
        topology::rtg(&self.inner, &addr.into()).await
    }

    /// Breadth-first LQI walk of the whole PAN. `start` defaults to the
    /// coordinator; entries are delivered on `sink` as they are discovered.
    pub async fn lqi_scan(
        &self,
        start: Option<Addr>,
        sink: Option<mpsc::UnboundedSender<LqiRecord>>,
    ) -> Result<Vec<LqiRecord>, ShepherdError> {
        topology::lqi_scan(&self.inner, start, sink).await
    }

    fn spawn_dispatcher(&self) {
        let inner = Arc::clone(&self.inner);
        let mut rx = inner.controller.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handle_indication(&inner, event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(missed = n, "indication stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("indication stream closed");
                        break;
                    }
                }
            }
        });
        *self.inner.dispatcher.lock().expect("dispatcher lock") = Some(handle);
    }
}

/// Translate one raw indication. Indications are processed in arrival
/// order; failures are logged and swallowed so the stream never stalls.
async fn handle_indication(inner: &Arc<ShepherdInner>, event: ControllerEvent) {
    match event {
        ControllerEvent::PermitJoining { time_left } => {
            inner.join_time_left.store(time_left, Ordering::SeqCst);
            inner.emit(ShepherdEvent::PermitJoining { time_left });
        }
        ControllerEvent::DevAnnounced { device } => {
            handle_announce(inner, device).await;
        }
        ControllerEvent::DevInterview { ieee_addr, status } => {
            inner.emit(ShepherdEvent::Ind(Ind::DevInterview { ieee_addr, status }));
        }
        ControllerEvent::DevLeaving { ieee_addr } => {
            let Some(dev) = inner.registry.find(&Addr::Ieee(ieee_addr.clone())) else {
                tracing::debug!(ieee = %ieee_addr, "leave for unknown device");
                return;
            };
            inner.emit(ShepherdEvent::Ind(Ind::DevLeaving {
                ieee_addr: ieee_addr.clone(),
                ep_list: dev.ep_list(),
            }));
            if let Err(e) = inner.registry.unregister(&ieee_addr).await {
                tracing::warn!(ieee = %ieee_addr, error = %e, "failed to unregister leaving device");
            }
        }
        ControllerEvent::DevStatus { nwk_addr, status } => {
            let changed = inner.registry.with_device_mut(&Addr::Nwk(nwk_addr), |d| {
                let changed = d.status != status;
                d.status = status;
                (d.ieee_addr.clone(), changed)
            });
            let Some((ieee_addr, changed)) = changed else {
                tracing::debug!(nwk = nwk_addr, "status for unknown device");
                return;
            };
            if changed {
                if let Err(e) = inner.registry.sync_one(&ieee_addr).await {
                    tracing::warn!(ieee = %ieee_addr, error = %e, "status sync failed");
                }
                inner.emit(ShepherdEvent::Ind(Ind::DevStatus { ieee_addr, status }));
            }
        }
        ControllerEvent::AttReport {
            nwk_addr,
            ep_id,
            cluster_id,
            records,
        } => {
            let Some(ieee_addr) = inner
                .registry
                .with_device(&Addr::Nwk(nwk_addr), |d| d.ieee_addr.clone())
            else {
                tracing::debug!(nwk = nwk_addr, "report from unknown device");
                return;
            };
            let cluster = catalog::cluster_key(cluster_id);

            let mut reported = BTreeMap::new();
            for rec in &records {
                reported.insert(
                    catalog::attr_key(cluster_id, rec.attr_id),
                    rec.value.clone(),
                );
            }
            inner.emit(ShepherdEvent::Ind(Ind::AttReport {
                ieee_addr: ieee_addr.clone(),
                ep_id,
                cluster: cluster.clone(),
                data: reported,
            }));

            let status_records: Vec<_> = records
                .into_iter()
                .map(|r| r.into_status_record())
                .collect();
            match inner.registry.apply_attr_records(
                &ieee_addr,
                ep_id,
                cluster_id,
                &cluster,
                &status_records,
                AttrSource::Report,
            ) {
                Ok(diff) if !diff.is_empty() => {
                    if let Err(e) = inner.registry.sync_one(&ieee_addr).await {
                        tracing::warn!(ieee = %ieee_addr, error = %e, "report sync failed");
                    }
                    inner.emit(ShepherdEvent::Ind(Ind::DevChange {
                        ieee_addr,
                        ep_id,
                        cluster,
                        data: diff,
                    }));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(ieee = %ieee_addr, error = %e, "report cache update dropped");
                }
            }
        }
        ControllerEvent::DataConfirm {
            nwk_addr,
            ep_id,
            status,
        } => {
            let Some(ieee_addr) = inner
                .registry
                .with_device(&Addr::Nwk(nwk_addr), |d| d.ieee_addr.clone())
            else {
                return;
            };
            inner.emit(ShepherdEvent::Ind(Ind::DataConfirm {
                ieee_addr,
                ep_id,
                status,
            }));
        }
        ControllerEvent::StatusChange {
            nwk_addr,
            ep_id,
            cluster_id,
            zone_status,
        } => {
            let Some(ieee_addr) = inner
                .registry
                .with_device(&Addr::Nwk(nwk_addr), |d| d.ieee_addr.clone())
            else {
                return;
            };
            inner.emit(ShepherdEvent::Ind(Ind::StatusChange {
                ieee_addr,
                ep_id,
                cluster: catalog::cluster_key(cluster_id),
                zone_status,
            }));
        }
        ControllerEvent::ZclMessage(msg) => {
            let app = inner
                .apps
                .read()
                .expect("apps lock")
                .iter()
                .find(|m| m.ep_id == msg.dst_ep_id)
                .map(|m| Arc::clone(&m.app));
            let Some(app) = app else {
                tracing::debug!(ep = msg.dst_ep_id, "zcl frame for unmounted endpoint");
                return;
            };
            match msg.kind {
                ZclKind::Foundation => app.handle_foundation(msg).await,
                ZclKind::Functional => app.handle_functional(msg).await,
            }
        }
    }
}

/// Join admission: consult the policy, run the interview, register.
async fn handle_announce(inner: &Arc<ShepherdInner>, device: DeviceInfo) {
    let ieee_addr = device.ieee_addr.clone();

    // re-announce of a known device: the network address may have changed
    let known = inner
        .registry
        .with_device_mut(&Addr::Ieee(ieee_addr.clone()), |d| {
            d.nwk_addr = device.nwk_addr;
            let was = d.status;
            d.status = DeviceStatus::Online;
            was
        });
    if let Some(was) = known {
        if let Err(e) = inner.registry.sync_one(&ieee_addr).await {
            tracing::warn!(ieee = %ieee_addr, error = %e, "announce sync failed");
        }
        if was == DeviceStatus::Offline {
            inner.emit(ShepherdEvent::Ind(Ind::DevStatus {
                ieee_addr,
                status: DeviceStatus::Online,
            }));
        }
        return;
    }

    let policy = inner.policy.read().expect("policy lock").clone();
    if !policy.accept_device(&device).await {
        tracing::info!(ieee = %ieee_addr, "device refused by admission policy");
        return;
    }

    inner.emit(ShepherdEvent::Ind(Ind::DevInterview {
        ieee_addr: ieee_addr.clone(),
        status: InterviewStatus::Started,
    }));

    match inner.controller.interview(&ieee_addr, device.nwk_addr).await {
        Ok(full) => {
            if !policy.accept_interview(&full).await {
                inner.emit(ShepherdEvent::Ind(Ind::DevInterview {
                    ieee_addr,
                    status: InterviewStatus::Rejected,
                }));
                return;
            }
            let dev = device_from_info(&full, false);
            let ep_list = dev.ep_list();
            match inner.registry.register(dev).await {
                Ok(_) => {
                    inner.emit(ShepherdEvent::Ind(Ind::DevInterview {
                        ieee_addr: ieee_addr.clone(),
                        status: InterviewStatus::Completed,
                    }));
                    inner.emit(ShepherdEvent::Ind(Ind::DevIncoming { ieee_addr, ep_list }));
                }
                Err(e) => {
                    tracing::warn!(ieee = %ieee_addr, error = %e, "registration failed");
                }
            }
        }
        Err(e) => {
            tracing::warn!(ieee = %ieee_addr, error = %e, "interview failed");
            // keep the device addressable for a later retry
            let dev = device_from_info(&device, true);
            if let Err(e) = inner.registry.register(dev).await {
                tracing::warn!(ieee = %ieee_addr, error = %e, "incomplete registration failed");
            }
            inner.emit(ShepherdEvent::Ind(Ind::DevInterview {
                ieee_addr,
                status: InterviewStatus::Failed,
            }));
        }
    }
}

fn device_from_info(info: &DeviceInfo, incomplete: bool) -> Device {
    let mut dev = Device::new(info.ieee_addr.clone(), info.nwk_addr);
    dev.device_type = info.device_type;
    dev.status = DeviceStatus::Online;
    dev.incomplete = incomplete;
    dev.manufacturer = info.manufacturer.clone();
    dev.model = info.model.clone();
    dev.power_source = info.power_source.clone();
    for sd in &info.endpoints {
        dev.endpoints.insert(sd.ep_id, Endpoint::from_descriptor(sd));
    }
    dev
}
