//! Mounted application seam
//!
//! An application claims one coordinator endpoint at mount time and receives
//! the ZCL traffic addressed to it.

use async_trait::async_trait;

use crate::af::ZclMessage;
use crate::device::SimpleDescriptor;

/// An application hosted on the coordinator.
///
/// `descriptor()` supplies the profile, device id, and cluster lists of the
/// endpoint to register; the endpoint id in the descriptor is ignored, the
/// shepherd allocates one at mount.
#[async_trait]
pub trait ZApp: Send + Sync {
    fn descriptor(&self) -> SimpleDescriptor;

    /// Incoming ZCL foundation frame addressed to this app's endpoint.
    async fn handle_foundation(&self, msg: ZclMessage);

    /// Incoming ZCL functional frame addressed to this app's endpoint.
    async fn handle_functional(&self, msg: ZclMessage);
}
