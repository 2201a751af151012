//! Radio-client seam
//!
//! The controller owns the serial transport and the vendor command set; this
//! crate drives it through the [`Controller`] trait and consumes its raw
//! indications as [`ControllerEvent`]s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::af::{StatusRecord, ZclMessage};
use crate::config::NetConfig;
use crate::device::{DeviceStatus, DeviceType, SimpleDescriptor};
use crate::error::ShepherdError;
use crate::event::InterviewStatus;

/// Subsystems of the vendor command set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    Sys,
    Sapi,
    Af,
    Zdo,
    Util,
}

/// Radio reset flavour. Hard resets additionally wipe the persisted store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    Hard,
    Soft,
}

impl TryFrom<&str> for ResetMode {
    type Error = ShepherdError;

    fn try_from(s: &str) -> Result<Self, ShepherdError> {
        match s {
            "hard" => Ok(Self::Hard),
            "soft" => Ok(Self::Soft),
            other => Err(ShepherdError::BadAddress(format!(
                "unknown reset mode: {other}"
            ))),
        }
    }
}

impl TryFrom<u8> for ResetMode {
    type Error = ShepherdError;

    fn try_from(v: u8) -> Result<Self, ShepherdError> {
        match v {
            0 => Ok(Self::Hard),
            1 => Ok(Self::Soft),
            other => Err(ShepherdError::BadAddress(format!(
                "unknown reset mode: {other}"
            ))),
        }
    }
}

/// Which devices a join window admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinScope {
    #[default]
    All,
    CoordOnly,
}

/// ZDO leave options.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RemoveConfig {
    pub rejoin: bool,
    pub rm_children: bool,
}

/// A device descriptor as the radio reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub ieee_addr: String,
    pub nwk_addr: u16,
    pub device_type: DeviceType,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub power_source: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<SimpleDescriptor>,
}

/// Network state as the radio reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetState {
    Offline,
    Joining,
    Connected,
    Leaving,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetInfo {
    pub state: NetState,
    pub channel: u8,
    pub pan_id: u16,
    pub ext_pan_id: String,
    pub ieee_addr: String,
    pub nwk_addr: u16,
}

/// Coordinator identifiers refreshed after endpoint registration.
#[derive(Debug, Clone, Serialize)]
pub struct CoordInfo {
    pub ieee_addr: String,
    pub nwk_addr: u16,
    pub ep_list: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FirmwareInfo {
    pub version: String,
    pub revision: u32,
}

/// One reported attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub attr_id: u16,
    pub data_type: u8,
    pub value: Value,
}

impl ReportRecord {
    pub(crate) fn into_status_record(self) -> StatusRecord {
        StatusRecord {
            attr_id: self.attr_id,
            status: 0,
            data_type: Some(self.data_type),
            attr_data: Some(self.value),
        }
    }
}

/// Raw indications from the radio.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// Join-window countdown tick
    PermitJoining { time_left: u16 },
    /// A device announced itself on the PAN
    DevAnnounced { device: DeviceInfo },
    /// Interview progress for a joining device
    DevInterview {
        ieee_addr: String,
        status: InterviewStatus,
    },
    /// A device left the PAN
    DevLeaving { ieee_addr: String },
    /// Online/offline transition
    DevStatus {
        nwk_addr: u16,
        status: DeviceStatus,
    },
    /// Attribute report frame
    AttReport {
        nwk_addr: u16,
        ep_id: u8,
        cluster_id: u16,
        records: Vec<ReportRecord>,
    },
    /// APS data confirm
    DataConfirm {
        nwk_addr: u16,
        ep_id: u8,
        status: u8,
    },
    /// IAS zone status change notification
    StatusChange {
        nwk_addr: u16,
        ep_id: u8,
        cluster_id: u16,
        zone_status: u16,
    },
    /// ZCL frame addressed to a local endpoint
    ZclMessage(ZclMessage),
}

/// The radio client.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Open the transport and boot the radio.
    async fn start(&self) -> Result<(), ShepherdError>;

    /// Close the transport. Outstanding requests fail with transport errors.
    async fn close(&self) -> Result<(), ShepherdError>;

    async fn reset(&self, mode: ResetMode) -> Result<(), ShepherdError>;

    async fn permit_join(&self, seconds: u16, scope: JoinScope) -> Result<(), ShepherdError>;

    /// Issue a raw vendor command.
    async fn request(
        &self,
        subsys: Subsystem,
        cmd: &str,
        args: Value,
    ) -> Result<Value, ShepherdError>;

    /// Register a local endpoint with the radio.
    async fn register_ep(&self, ep: &crate::device::Endpoint) -> Result<(), ShepherdError>;

    async fn bind(
        &self,
        src: &crate::af::EndpointRef,
        cluster_id: u16,
        dst: &crate::af::EndpointRef,
    ) -> Result<(), ShepherdError>;

    async fn unbind(
        &self,
        src: &crate::af::EndpointRef,
        cluster_id: u16,
        dst: &crate::af::EndpointRef,
    ) -> Result<(), ShepherdError>;

    /// Ask the device to leave the PAN.
    async fn remove(&self, ieee_addr: &str, cfg: RemoveConfig) -> Result<(), ShepherdError>;

    /// Full descriptor of the local device, including its endpoints.
    async fn coordinator(&self) -> Result<DeviceInfo, ShepherdError>;

    /// Coordinator identifiers, re-queried from the radio.
    async fn coord_info(&self) -> Result<CoordInfo, ShepherdError>;

    async fn net_info(&self) -> Result<NetInfo, ShepherdError>;

    async fn firmware_info(&self) -> Result<FirmwareInfo, ShepherdError>;

    async fn set_nv_params(&self, net: &NetConfig) -> Result<(), ShepherdError>;

    /// Discover a joining device's endpoints, clusters, and basic
    /// attributes. Progress is emitted on the event stream.
    async fn interview(
        &self,
        ieee_addr: &str,
        nwk_addr: u16,
    ) -> Result<DeviceInfo, ShepherdError>;

    fn subscribe(&self) -> broadcast::Receiver<ControllerEvent>;
}
