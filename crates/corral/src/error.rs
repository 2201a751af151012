//! Error types for the shepherd façade

use thiserror::Error;

/// Errors surfaced by the public façade and its collaborators.
#[derive(Error, Debug)]
pub enum ShepherdError {
    /// Operation attempted before `start()`
    #[error("Shepherd is not enabled")]
    NotEnabled,

    /// `start()` called while already enabled
    #[error("Shepherd is already started")]
    AlreadyStarted,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Endpoint not found: {addr} ep {ep_id}")]
    EndpointNotFound { addr: String, ep_id: u8 },

    #[error("Device already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Application is already mounted")]
    DuplicateMount,

    #[error("Coordinator is not ready")]
    CoordinatorNotReady,

    /// No delegator endpoint exists for the profile
    #[error("No delegator for profile {0:#06x}")]
    ProfileUnsupported(u16),

    /// The radio answered with a non-zero ZCL/ZDO status
    #[error("request unsuccess: {0}")]
    RequestUnsuccess(u8),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] corral_store::StoreError),

    #[error("Bad address: {0}")]
    BadAddress(String),

    #[error("Unknown ZCL identifier: {0}")]
    UnknownId(String),

    #[error("Bad response: {0}")]
    BadResponse(String),
}
