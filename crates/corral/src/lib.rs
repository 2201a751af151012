//! Host-side Zigbee coordinator controller
//!
//! This crate drives a serially-attached coordinator radio through the
//! [`controller::Controller`] seam and keeps an authoritative, persisted
//! mirror of the PAN: devices, endpoints, clusters, and their last-known
//! attribute values. The [`shepherd::Shepherd`] façade covers device
//! lifecycle (join admission, interview, leave, removal), local application
//! endpoints, ZCL request routing with cache reconciliation, and topology
//! scanning.

pub mod af;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod event;
pub mod registry;
pub mod request;
pub mod shepherd;
pub mod topology;
pub mod zapp;

mod mount;

pub use af::{
    AfLayer, AttrRecord, EndpointRef, FoundationCmd, StatusRecord, ZclConfig, ZclKind,
    ZclMessage, ZclPayload,
};
pub use catalog::ZclKey;
pub use config::{NetConfig, SerialSettings, ShepherdConfig};
pub use controller::{
    Controller, ControllerEvent, CoordInfo, DeviceInfo, FirmwareInfo, JoinScope, NetInfo,
    NetState, RemoveConfig, ReportRecord, ResetMode, Subsystem,
};
pub use device::{Addr, Device, DeviceStatus, DeviceSummary, DeviceType, Endpoint, SimpleDescriptor};
pub use error::ShepherdError;
pub use event::{Ind, InterviewStatus, ShepherdEvent};
pub use registry::DeviceStore;
pub use request::{AppHandle, EndpointHandle};
pub use shepherd::{AcceptAll, AdmissionPolicy, Shepherd, ShepherdInfo};
pub use topology::{LqiRecord, NeighborLqi, RoutingEntry};
pub use zapp::ZApp;
