//! Topology queries: single-hop LQI, routing tables, and the breadth-first
//! PAN scan.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::controller::Subsystem;
use crate::device::{Addr, DeviceStatus, DeviceType};
use crate::error::ShepherdError;
use crate::shepherd::ShepherdInner;

/// The all-zero IEEE address some radios report for empty table slots.
const NIL_IEEE: &str = "0x0000000000000000";

/// One neighbour table entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborLqi {
    #[serde(rename = "ieeeaddr")]
    pub ieee_addr: String,
    #[serde(rename = "nwkaddr")]
    pub nwk_addr: u16,
    pub lqi: u8,
}

#[derive(Deserialize)]
struct LqiRsp {
    status: u8,
    #[serde(default, rename = "neighborlqilist")]
    neighbor_lqi_list: Vec<NeighborLqi>,
}

/// One routing table entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingEntry {
    #[serde(rename = "destNwkAddr")]
    pub dest_nwk_addr: u16,
    #[serde(rename = "routeStatus")]
    pub route_status: u8,
    #[serde(rename = "nextHopNwkAddr")]
    pub next_hop_nwk_addr: u16,
}

#[derive(Deserialize)]
struct RtgRsp {
    status: u8,
    #[serde(default, rename = "routingtable")]
    routing_table: Vec<RoutingEntry>,
}

/// One node discovered by [`lqi_scan`].
#[derive(Debug, Clone, Serialize)]
pub struct LqiRecord {
    pub ieee_addr: String,
    pub nwk_addr: u16,
    pub lqi: u8,
    /// The node this one was first sighted from; the start node has none
    pub parent: Option<String>,
    pub status: DeviceStatus,
    /// Set when this node's own neighbour fetch failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn lqi_by_nwk(
    inner: &ShepherdInner,
    nwk_addr: u16,
) -> Result<Vec<NeighborLqi>, ShepherdError> {
    let rsp = inner
        .controller
        .request(
            Subsystem::Zdo,
            "mgmtLqiReq",
            json!({ "dstaddr": nwk_addr, "startindex": 0 }),
        )
        .await?;
    let rsp: LqiRsp =
        serde_json::from_value(rsp).map_err(|e| ShepherdError::BadResponse(e.to_string()))?;
    if rsp.status != 0 {
        return Err(ShepherdError::RequestUnsuccess(rsp.status));
    }
    Ok(rsp.neighbor_lqi_list)
}

pub(crate) async fn lqi(
    inner: &Arc<ShepherdInner>,
    addr: &Addr,
) -> Result<Vec<NeighborLqi>, ShepherdError> {
    let nwk_addr = inner
        .registry
        .with_device(addr, |d| d.nwk_addr)
        .ok_or_else(|| ShepherdError::DeviceNotFound(addr.to_string()))?;
    lqi_by_nwk(inner, nwk_addr).await
}

/// Routes whose low status bits mark them inactive are dropped.
fn active_routes(entries: Vec<RoutingEntry>) -> Vec<RoutingEntry> {
    entries
        .into_iter()
        .filter(|e| e.route_status & 7 != 3)
        .collect()
}

pub(crate) async fn rtg(
    inner: &Arc<ShepherdInner>,
    addr: &Addr,
) -> Result<Vec<RoutingEntry>, ShepherdError> {
    let nwk_addr = inner
        .registry
        .with_device(addr, |d| d.nwk_addr)
        .ok_or_else(|| ShepherdError::DeviceNotFound(addr.to_string()))?;
    let rsp = inner
        .controller
        .request(
            Subsystem::Zdo,
            "mgmtRtgReq",
            json!({ "dstaddr": nwk_addr, "startindex": 0 }),
        )
        .await?;
    let rsp: RtgRsp =
        serde_json::from_value(rsp).map_err(|e| ShepherdError::BadResponse(e.to_string()))?;
    if rsp.status != 0 {
        return Err(ShepherdError::RequestUnsuccess(rsp.status));
    }
    Ok(active_routes(rsp.routing_table))
}

/// Breadth-first LQI walk.
///
/// Level-synchronous: every node of one level is queried in parallel and the
/// next level starts only once they have all settled. Nodes are
/// deduplicated by IEEE address (first sighting wins); only routers are
/// scanned further; a failing neighbour fetch is recorded on the node's
/// entry and does not abort the walk.
pub(crate) async fn lqi_scan(
    inner: &Arc<ShepherdInner>,
    start: Option<Addr>,
    sink: Option<mpsc::UnboundedSender<LqiRecord>>,
) -> Result<Vec<LqiRecord>, ShepherdError> {
    let start_addr = match start {
        Some(addr) => addr,
        None => Addr::Ieee(
            inner
                .coord_ieee()
                .ok_or(ShepherdError::CoordinatorNotReady)?,
        ),
    };
    let start_dev = inner
        .registry
        .find(&start_addr)
        .ok_or_else(|| ShepherdError::DeviceNotFound(start_addr.to_string()))?;

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut records = vec![LqiRecord {
        ieee_addr: start_dev.ieee_addr.clone(),
        nwk_addr: start_dev.nwk_addr,
        lqi: 0,
        parent: None,
        status: start_dev.status,
        error: None,
    }];
    index.insert(start_dev.ieee_addr.clone(), 0);

    let mut frontier = vec![(start_dev.ieee_addr, start_dev.nwk_addr)];
    while !frontier.is_empty() {
        let results = join_all(frontier.iter().map(|(ieee, nwk_addr)| {
            let ieee = ieee.clone();
            let nwk_addr = *nwk_addr;
            async move { (ieee, lqi_by_nwk(inner, nwk_addr).await) }
        }))
        .await;

        let mut next = Vec::new();
        for (node_ieee, result) in results {
            let neighbors = match result {
                Ok(neighbors) => neighbors,
                Err(e) => {
                    tracing::warn!(ieee = %node_ieee, error = %e, "neighbour fetch failed");
                    if let Some(i) = index.get(&node_ieee) {
                        records[*i].error = Some(e.to_string());
                    }
                    continue;
                }
            };
            for n in neighbors {
                if n.ieee_addr == NIL_IEEE || index.contains_key(&n.ieee_addr) {
                    continue;
                }
                let (status, device_type) = inner
                    .registry
                    .with_device(&Addr::Ieee(n.ieee_addr.clone()), |d| {
                        (d.status, d.device_type)
                    })
                    .unwrap_or((DeviceStatus::Offline, DeviceType::Unknown));

                let record = LqiRecord {
                    ieee_addr: n.ieee_addr.clone(),
                    nwk_addr: n.nwk_addr,
                    lqi: n.lqi,
                    parent: Some(node_ieee.clone()),
                    status,
                    error: None,
                };
                if let Some(tx) = &sink {
                    let _ = tx.send(record.clone());
                }
                index.insert(n.ieee_addr.clone(), records.len());
                records.push(record);

                if device_type == DeviceType::Router {
                    next.push((n.ieee_addr, n.nwk_addr));
                }
            }
        }
        frontier = next;
    }

    tracing::debug!(nodes = records.len(), "topology scan complete");
    Ok(records)
}
