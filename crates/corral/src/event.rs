//! External event stream
//!
//! Everything the shepherd tells the outside world goes through one
//! broadcast channel of [`ShepherdEvent`]; indications are one sum type
//! rather than stringly-tagged payloads.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::device::DeviceStatus;

/// Interview lifecycle of a joining device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterviewStatus {
    Started,
    /// Endpoint discovery progress
    Endpoints { current: u8, total: u8 },
    Completed,
    Failed,
    /// Vetoed by the admission policy
    Rejected,
}

/// Events emitted by the shepherd.
#[derive(Debug, Clone)]
pub enum ShepherdEvent {
    /// Startup finished; emitted once per successful `start`
    Ready,
    /// Join-window countdown tick
    PermitJoining { time_left: u16 },
    /// A translated radio indication
    Ind(Ind),
}

/// Translated radio indications.
///
/// Payloads carry the IEEE address and endpoint ids; consumers resolve the
/// live objects through the façade when they need more.
#[derive(Debug, Clone)]
pub enum Ind {
    /// Device joined and its interview finished
    DevIncoming { ieee_addr: String, ep_list: Vec<u8> },
    /// Interview progress
    DevInterview {
        ieee_addr: String,
        status: InterviewStatus,
    },
    /// Device left the PAN; carries the vanishing endpoint list
    DevLeaving { ieee_addr: String, ep_list: Vec<u8> },
    /// Cluster attribute cache changed; `data` is the non-empty diff
    DevChange {
        ieee_addr: String,
        ep_id: u8,
        cluster: String,
        data: BTreeMap<String, Value>,
    },
    /// APS data confirm
    DataConfirm {
        ieee_addr: String,
        ep_id: u8,
        status: u8,
    },
    /// IAS zone status change
    StatusChange {
        ieee_addr: String,
        ep_id: u8,
        cluster: String,
        zone_status: u16,
    },
    /// Attribute report; `data` holds every reported value
    AttReport {
        ieee_addr: String,
        ep_id: u8,
        cluster: String,
        data: BTreeMap<String, Value>,
    },
    /// Online/offline transition
    DevStatus {
        ieee_addr: String,
        status: DeviceStatus,
    },
}
