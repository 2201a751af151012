//! AF/ZCL frame-builder seam
//!
//! The AF layer turns ZCL operations into over-the-air frames and parses the
//! responses. This crate only consumes its interface; the concrete
//! implementation lives with the radio client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::ShepherdError;

/// Addressing for one end of a ZCL exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRef {
    pub ieee_addr: String,
    pub nwk_addr: u16,
    pub ep_id: u8,
    pub profile_id: u16,
}

/// ZCL foundation (generic) commands issued by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoundationCmd {
    Read,
    Write,
    WriteUndiv,
    WriteNoRsp,
    ConfigReport,
    ReadReportConfig,
    Discover,
}

impl FoundationCmd {
    pub fn name(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::WriteUndiv => "writeUndiv",
            Self::WriteNoRsp => "writeNoRsp",
            Self::ConfigReport => "configReport",
            Self::ReadReportConfig => "readReportConfig",
            Self::Discover => "discover",
        }
    }

    /// The write family shares the refresh-after-write cache procedure.
    pub fn is_write(self) -> bool {
        matches!(self, Self::Write | Self::WriteUndiv | Self::WriteNoRsp)
    }
}

/// One attribute record in a foundation request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrRecord {
    pub attr_id: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attr_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_rep_intval: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rep_intval: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rep_change: Option<Value>,
}

impl AttrRecord {
    pub fn read(attr_id: u16) -> Self {
        Self {
            attr_id,
            data_type: None,
            attr_data: None,
            direction: None,
            min_rep_intval: None,
            max_rep_intval: None,
            rep_change: None,
        }
    }

    pub fn write(attr_id: u16, data_type: u8, attr_data: Value) -> Self {
        Self {
            data_type: Some(data_type),
            attr_data: Some(attr_data),
            ..Self::read(attr_id)
        }
    }

    pub fn config_report(
        attr_id: u16,
        data_type: u8,
        min_rep_intval: u16,
        max_rep_intval: u16,
        rep_change: Value,
    ) -> Self {
        Self {
            data_type: Some(data_type),
            direction: Some(0),
            min_rep_intval: Some(min_rep_intval),
            max_rep_intval: Some(max_rep_intval),
            rep_change: Some(rep_change),
            ..Self::read(attr_id)
        }
    }
}

/// One attribute record in a foundation response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub attr_id: u16,
    pub status: u8,
    #[serde(default)]
    pub data_type: Option<u8>,
    #[serde(default)]
    pub attr_data: Option<Value>,
}

/// Per-request options.
#[derive(Debug, Clone)]
pub struct ZclConfig {
    pub manuf_code: Option<u16>,
    pub disable_default_rsp: bool,
    /// Functional commands refresh the cluster cache only when this is
    /// cleared; foundation post-processing ignores it.
    pub skip_finalize: bool,
}

impl Default for ZclConfig {
    fn default() -> Self {
        Self {
            manuf_code: None,
            disable_default_rsp: false,
            skip_finalize: true,
        }
    }
}

/// Parsed response payload from the AF layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ZclPayload {
    /// Attribute records (read/write/configReport responses)
    Records(Vec<StatusRecord>),
    /// Anything else, left to the caller
    Raw(Value),
}

impl ZclPayload {
    pub fn records(&self) -> Option<&[StatusRecord]> {
        match self {
            Self::Records(r) => Some(r),
            Self::Raw(_) => None,
        }
    }
}

/// Frame type of an incoming ZCL message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZclKind {
    Foundation,
    Functional,
}

/// A ZCL frame delivered to a local endpoint.
#[derive(Debug, Clone)]
pub struct ZclMessage {
    pub src_nwk_addr: u16,
    pub src_ep_id: u8,
    pub dst_ep_id: u8,
    pub cluster_id: u16,
    pub kind: ZclKind,
    pub cmd_id: u8,
    pub payload: Value,
}

/// The AF/ZCL frame builder.
#[async_trait]
pub trait AfLayer: Send + Sync {
    /// Issue a generic ZCL command and return the parsed response payload.
    async fn zcl_foundation(
        &self,
        src: &EndpointRef,
        dst: &EndpointRef,
        cluster_id: u16,
        cmd: FoundationCmd,
        records: Vec<AttrRecord>,
        cfg: &ZclConfig,
    ) -> Result<ZclPayload, ShepherdError>;

    /// Issue a cluster-specific command.
    async fn zcl_functional(
        &self,
        src: &EndpointRef,
        dst: &EndpointRef,
        cluster_id: u16,
        cmd: &str,
        args: Value,
        cfg: &ZclConfig,
    ) -> Result<ZclPayload, ShepherdError>;

    /// Read back every attribute of one cluster, keyed by catalog name.
    async fn zcl_cluster_attrs(
        &self,
        dst: &EndpointRef,
        cluster_id: u16,
    ) -> Result<BTreeMap<String, Value>, ShepherdError>;
}
