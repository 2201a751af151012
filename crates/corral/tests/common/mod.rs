//! Mock radio client and AF layer shared by the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use corral::{
    AfLayer, AttrRecord, Controller, ControllerEvent, CoordInfo, DeviceInfo, DeviceStore,
    DeviceType, Endpoint, EndpointRef, FirmwareInfo, FoundationCmd, Ind, JoinScope, NetConfig,
    NetInfo, NetState, RemoveConfig, ResetMode, Shepherd, ShepherdConfig, ShepherdError,
    ShepherdEvent, SimpleDescriptor, StatusRecord, Subsystem, ZApp, ZclConfig, ZclMessage,
    ZclPayload,
};

pub const COORD_IEEE: &str = "0x00124b00beef0001";

pub fn coordinator_info() -> DeviceInfo {
    DeviceInfo {
        ieee_addr: COORD_IEEE.to_string(),
        nwk_addr: 0,
        device_type: DeviceType::Coordinator,
        manufacturer: Some("Texas Instruments".to_string()),
        model: Some("CC2531".to_string()),
        power_source: Some("mains".to_string()),
        endpoints: vec![SimpleDescriptor {
            ep_id: 1,
            profile_id: 0x0104,
            device_id: 0x0005,
            in_clusters: vec![],
            out_clusters: vec![],
        }],
    }
}

/// Descriptor for a typical on/off device on the HA profile.
pub fn device_info(ieee: &str, nwk_addr: u16, device_type: DeviceType) -> DeviceInfo {
    device_info_with(
        ieee,
        nwk_addr,
        device_type,
        vec![SimpleDescriptor {
            ep_id: 1,
            profile_id: 0x0104,
            device_id: 0x0100,
            in_clusters: vec![0x0000, 0x0006],
            out_clusters: vec![],
        }],
    )
}

pub fn device_info_with(
    ieee: &str,
    nwk_addr: u16,
    device_type: DeviceType,
    endpoints: Vec<SimpleDescriptor>,
) -> DeviceInfo {
    DeviceInfo {
        ieee_addr: ieee.to_string(),
        nwk_addr,
        device_type,
        manufacturer: Some("LUMI".to_string()),
        model: Some("lumi.plug".to_string()),
        power_source: Some("mains".to_string()),
        endpoints,
    }
}

// ── Mock controller ─────────────────────────────────────────────────

pub struct MockController {
    event_tx: broadcast::Sender<ControllerEvent>,
    pub coord: DeviceInfo,
    pub register_delay: Duration,
    pub reset_calls: AtomicUsize,
    pub registered_eps: Mutex<Vec<u8>>,
    register_inflight: AtomicUsize,
    pub register_overlap: AtomicBool,
    pub binds: Mutex<Vec<(EndpointRef, u16, EndpointRef)>>,
    pub unbinds: Mutex<Vec<(EndpointRef, u16, EndpointRef)>>,
    pub removed: Mutex<Vec<(String, RemoveConfig)>>,
    pub permit_calls: Mutex<Vec<(u16, JoinScope)>>,
    interviews: Mutex<HashMap<String, DeviceInfo>>,
    zdo_rsp: Mutex<HashMap<(String, u16), Value>>,
    pub zdo_requests: Mutex<Vec<(String, u16)>>,
}

impl MockController {
    pub fn new() -> Arc<Self> {
        Self::with_register_delay(Duration::ZERO)
    }

    pub fn with_register_delay(register_delay: Duration) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            event_tx,
            coord: coordinator_info(),
            register_delay,
            reset_calls: AtomicUsize::new(0),
            registered_eps: Mutex::new(Vec::new()),
            register_inflight: AtomicUsize::new(0),
            register_overlap: AtomicBool::new(false),
            binds: Mutex::new(Vec::new()),
            unbinds: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            permit_calls: Mutex::new(Vec::new()),
            interviews: Mutex::new(HashMap::new()),
            zdo_rsp: Mutex::new(HashMap::new()),
            zdo_requests: Mutex::new(Vec::new()),
        })
    }

    /// Inject a raw indication as the radio would.
    pub fn send(&self, event: ControllerEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn set_interview(&self, info: DeviceInfo) {
        self.interviews
            .lock()
            .unwrap()
            .insert(info.ieee_addr.clone(), info);
    }

    pub fn set_zdo(&self, cmd: &str, dstaddr: u16, rsp: Value) {
        self.zdo_rsp
            .lock()
            .unwrap()
            .insert((cmd.to_string(), dstaddr), rsp);
    }
}

#[async_trait]
impl Controller for MockController {
    async fn start(&self) -> Result<(), ShepherdError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), ShepherdError> {
        Ok(())
    }

    async fn reset(&self, _mode: ResetMode) -> Result<(), ShepherdError> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn permit_join(&self, seconds: u16, scope: JoinScope) -> Result<(), ShepherdError> {
        self.permit_calls.lock().unwrap().push((seconds, scope));
        Ok(())
    }

    async fn request(
        &self,
        _subsys: Subsystem,
        cmd: &str,
        args: Value,
    ) -> Result<Value, ShepherdError> {
        let dstaddr = args["dstaddr"].as_u64().unwrap_or(0) as u16;
        self.zdo_requests
            .lock()
            .unwrap()
            .push((cmd.to_string(), dstaddr));
        self.zdo_rsp
            .lock()
            .unwrap()
            .get(&(cmd.to_string(), dstaddr))
            .cloned()
            .ok_or_else(|| ShepherdError::Transport(format!("no response for {cmd} {dstaddr:#06x}")))
    }

    async fn register_ep(&self, ep: &Endpoint) -> Result<(), ShepherdError> {
        if self.register_inflight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.register_overlap.store(true, Ordering::SeqCst);
        }
        if !self.register_delay.is_zero() {
            tokio::time::sleep(self.register_delay).await;
        }
        self.registered_eps.lock().unwrap().push(ep.id);
        self.register_inflight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn bind(
        &self,
        src: &EndpointRef,
        cluster_id: u16,
        dst: &EndpointRef,
    ) -> Result<(), ShepherdError> {
        self.binds
            .lock()
            .unwrap()
            .push((src.clone(), cluster_id, dst.clone()));
        Ok(())
    }

    async fn unbind(
        &self,
        src: &EndpointRef,
        cluster_id: u16,
        dst: &EndpointRef,
    ) -> Result<(), ShepherdError> {
        self.unbinds
            .lock()
            .unwrap()
            .push((src.clone(), cluster_id, dst.clone()));
        Ok(())
    }

    async fn remove(&self, ieee_addr: &str, cfg: RemoveConfig) -> Result<(), ShepherdError> {
        self.removed
            .lock()
            .unwrap()
            .push((ieee_addr.to_string(), cfg));
        Ok(())
    }

    async fn coordinator(&self) -> Result<DeviceInfo, ShepherdError> {
        Ok(self.coord.clone())
    }

    async fn coord_info(&self) -> Result<CoordInfo, ShepherdError> {
        Ok(CoordInfo {
            ieee_addr: self.coord.ieee_addr.clone(),
            nwk_addr: self.coord.nwk_addr,
            ep_list: self.registered_eps.lock().unwrap().clone(),
        })
    }

    async fn net_info(&self) -> Result<NetInfo, ShepherdError> {
        Ok(NetInfo {
            state: NetState::Connected,
            channel: 11,
            pan_id: 0x1a62,
            ext_pan_id: "0x00124b00beef0001".to_string(),
            ieee_addr: self.coord.ieee_addr.clone(),
            nwk_addr: 0,
        })
    }

    async fn firmware_info(&self) -> Result<FirmwareInfo, ShepherdError> {
        Ok(FirmwareInfo {
            version: "2.7.1".to_string(),
            revision: 20190425,
        })
    }

    async fn set_nv_params(&self, _net: &NetConfig) -> Result<(), ShepherdError> {
        Ok(())
    }

    async fn interview(
        &self,
        ieee_addr: &str,
        _nwk_addr: u16,
    ) -> Result<DeviceInfo, ShepherdError> {
        self.interviews
            .lock()
            .unwrap()
            .get(ieee_addr)
            .cloned()
            .ok_or_else(|| ShepherdError::Transport(format!("interview failed: {ieee_addr}")))
    }

    fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.event_tx.subscribe()
    }
}

// ── Mock AF layer ───────────────────────────────────────────────────

pub struct FoundationCall {
    pub src: EndpointRef,
    pub dst: EndpointRef,
    pub cluster_id: u16,
    pub cmd: FoundationCmd,
    pub records: Vec<AttrRecord>,
}

pub struct FunctionalCall {
    pub src: EndpointRef,
    pub dst: EndpointRef,
    pub cluster_id: u16,
    pub cmd: String,
    pub args: Value,
}

pub struct MockAf {
    pub foundation_calls: Mutex<Vec<FoundationCall>>,
    pub functional_calls: Mutex<Vec<FunctionalCall>>,
    foundation_rsp: Mutex<HashMap<(u16, &'static str), VecDeque<ZclPayload>>>,
    functional_rsp: Mutex<HashMap<(u16, String), VecDeque<ZclPayload>>>,
    cluster_attrs: Mutex<HashMap<(String, u8, u16), BTreeMap<String, Value>>>,
}

impl MockAf {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            foundation_calls: Mutex::new(Vec::new()),
            functional_calls: Mutex::new(Vec::new()),
            foundation_rsp: Mutex::new(HashMap::new()),
            functional_rsp: Mutex::new(HashMap::new()),
            cluster_attrs: Mutex::new(HashMap::new()),
        })
    }

    pub fn push_foundation(&self, cluster_id: u16, cmd: FoundationCmd, payload: ZclPayload) {
        self.foundation_rsp
            .lock()
            .unwrap()
            .entry((cluster_id, cmd.name()))
            .or_default()
            .push_back(payload);
    }

    pub fn push_functional(&self, cluster_id: u16, cmd: &str, payload: ZclPayload) {
        self.functional_rsp
            .lock()
            .unwrap()
            .entry((cluster_id, cmd.to_string()))
            .or_default()
            .push_back(payload);
    }

    /// What a follow-up whole-cluster query reports for an endpoint.
    pub fn set_cluster_attrs(
        &self,
        ieee: &str,
        ep_id: u8,
        cluster_id: u16,
        attrs: BTreeMap<String, Value>,
    ) {
        self.cluster_attrs
            .lock()
            .unwrap()
            .insert((ieee.to_string(), ep_id, cluster_id), attrs);
    }
}

#[async_trait]
impl AfLayer for MockAf {
    async fn zcl_foundation(
        &self,
        src: &EndpointRef,
        dst: &EndpointRef,
        cluster_id: u16,
        cmd: FoundationCmd,
        records: Vec<AttrRecord>,
        _cfg: &ZclConfig,
    ) -> Result<ZclPayload, ShepherdError> {
        self.foundation_calls.lock().unwrap().push(FoundationCall {
            src: src.clone(),
            dst: dst.clone(),
            cluster_id,
            cmd,
            records,
        });
        Ok(self
            .foundation_rsp
            .lock()
            .unwrap()
            .get_mut(&(cluster_id, cmd.name()))
            .and_then(VecDeque::pop_front)
            .unwrap_or(ZclPayload::Records(Vec::new())))
    }

    async fn zcl_functional(
        &self,
        src: &EndpointRef,
        dst: &EndpointRef,
        cluster_id: u16,
        cmd: &str,
        args: Value,
        _cfg: &ZclConfig,
    ) -> Result<ZclPayload, ShepherdError> {
        self.functional_calls.lock().unwrap().push(FunctionalCall {
            src: src.clone(),
            dst: dst.clone(),
            cluster_id,
            cmd: cmd.to_string(),
            args,
        });
        Ok(self
            .functional_rsp
            .lock()
            .unwrap()
            .get_mut(&(cluster_id, cmd.to_string()))
            .and_then(VecDeque::pop_front)
            .unwrap_or(ZclPayload::Raw(json!({ "status": 0 }))))
    }

    async fn zcl_cluster_attrs(
        &self,
        dst: &EndpointRef,
        cluster_id: u16,
    ) -> Result<BTreeMap<String, Value>, ShepherdError> {
        Ok(self
            .cluster_attrs
            .lock()
            .unwrap()
            .get(&(dst.ieee_addr.clone(), dst.ep_id, cluster_id))
            .cloned()
            .unwrap_or_default())
    }
}

// ── Test application ────────────────────────────────────────────────

pub struct TestApp {
    profile_id: u16,
    pub foundation_msgs: Mutex<Vec<ZclMessage>>,
    pub functional_msgs: Mutex<Vec<ZclMessage>>,
}

impl TestApp {
    pub fn new(profile_id: u16) -> Arc<Self> {
        Arc::new(Self {
            profile_id,
            foundation_msgs: Mutex::new(Vec::new()),
            functional_msgs: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ZApp for TestApp {
    fn descriptor(&self) -> SimpleDescriptor {
        SimpleDescriptor {
            ep_id: 0,
            profile_id: self.profile_id,
            device_id: 0x0008,
            in_clusters: vec![0x0000, 0x0006],
            out_clusters: vec![0x0006],
        }
    }

    async fn handle_foundation(&self, msg: ZclMessage) {
        self.foundation_msgs.lock().unwrap().push(msg);
    }

    async fn handle_functional(&self, msg: ZclMessage) {
        self.functional_msgs.lock().unwrap().push(msg);
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct Harness {
    pub shepherd: Shepherd,
    pub controller: Arc<MockController>,
    pub af: Arc<MockAf>,
    pub events: broadcast::Receiver<ShepherdEvent>,
}

pub fn setup_with(
    controller: Arc<MockController>,
    config: ShepherdConfig,
    store: DeviceStore,
) -> Harness {
    let af = MockAf::new();
    let shepherd = Shepherd::new(controller.clone(), af.clone(), store, config);
    let events = shepherd.subscribe();
    Harness {
        shepherd,
        controller,
        af,
        events,
    }
}

pub fn setup() -> Harness {
    setup_with(
        MockController::new(),
        ShepherdConfig::default(),
        DeviceStore::in_memory(),
    )
}

pub async fn setup_started() -> Harness {
    let mut h = setup();
    h.shepherd.start().await.unwrap();
    expect_event(&mut h.events, |e| matches!(e, ShepherdEvent::Ready)).await;
    h
}

pub async fn expect_event(
    rx: &mut broadcast::Receiver<ShepherdEvent>,
    pred: impl Fn(&ShepherdEvent) -> bool,
) -> ShepherdEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = rx.recv().await.expect("event stream closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub async fn expect_ind(
    rx: &mut broadcast::Receiver<ShepherdEvent>,
    pred: impl Fn(&Ind) -> bool,
) -> Ind {
    match expect_event(rx, |e| matches!(e, ShepherdEvent::Ind(i) if pred(i))).await {
        ShepherdEvent::Ind(ind) => ind,
        _ => unreachable!(),
    }
}

/// Assert that no indication matching `pred` arrives within `ms`.
pub async fn assert_no_ind(
    rx: &mut broadcast::Receiver<ShepherdEvent>,
    pred: impl Fn(&Ind) -> bool,
    ms: u64,
) {
    let matched = tokio::time::timeout(Duration::from_millis(ms), async {
        loop {
            match rx.recv().await {
                Ok(ShepherdEvent::Ind(ind)) if pred(&ind) => return,
                Ok(_) => {}
                Err(_) => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(matched.is_err(), "unexpected indication arrived");
}

/// Walk a device through announce + interview and wait for it to land in
/// the registry.
pub async fn join_device(h: &mut Harness, info: DeviceInfo) {
    let announce = DeviceInfo {
        endpoints: Vec::new(),
        ..info.clone()
    };
    h.controller.set_interview(info.clone());
    h.controller
        .send(ControllerEvent::DevAnnounced { device: announce });
    expect_ind(
        &mut h.events,
        |i| matches!(i, Ind::DevIncoming { ieee_addr, .. } if *ieee_addr == info.ieee_addr),
    )
    .await;
}

pub fn lqi_rsp(neighbors: &[(&str, u16, u8)]) -> Value {
    json!({
        "status": 0,
        "neighborlqilist": neighbors
            .iter()
            .map(|(ieee, nwk, lqi)| json!({ "ieeeaddr": ieee, "nwkaddr": nwk, "lqi": lqi }))
            .collect::<Vec<_>>(),
    })
}

pub fn ok_record(attr_id: u16, data_type: u8, attr_data: Value) -> StatusRecord {
    StatusRecord {
        attr_id,
        status: 0,
        data_type: Some(data_type),
        attr_data: Some(attr_data),
    }
}

pub fn err_record(attr_id: u16, status: u8) -> StatusRecord {
    StatusRecord {
        attr_id,
        status,
        data_type: None,
        attr_data: None,
    }
}
