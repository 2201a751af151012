//! Request router
//!
//! Wraps AF/ZCL operations, reconciles the registry from the responses, and
//! exposes the per-endpoint ZCL capability in two flavours: a handle onto a
//! remote endpoint, and a handle onto a mounted application that addresses
//! its destination per call.

use serde_json::Value;
use std::sync::Arc;

use crate::af::{
    AttrRecord, EndpointRef, FoundationCmd, StatusRecord, ZclConfig, ZclPayload,
};
use crate::catalog::{self, ZclKey};
use crate::device::{Addr, Device, Endpoint};
use crate::error::ShepherdError;
use crate::event::{Ind, ShepherdEvent};
use crate::registry::AttrSource;
use crate::shepherd::ShepherdInner;

fn endpoint_ref(dev: &Device, ep: &Endpoint) -> EndpointRef {
    EndpointRef {
        ieee_addr: dev.ieee_addr.clone(),
        nwk_addr: dev.nwk_addr,
        ep_id: ep.id,
        profile_id: ep.profile_id,
    }
}

pub(crate) fn resolve_dst(
    inner: &ShepherdInner,
    addr: &Addr,
    ep_id: u8,
) -> Result<EndpointRef, ShepherdError> {
    inner
        .registry
        .with_device(addr, |d| d.endpoint(ep_id).map(|ep| endpoint_ref(d, ep)))
        .ok_or_else(|| ShepherdError::DeviceNotFound(addr.to_string()))?
        .ok_or_else(|| ShepherdError::EndpointNotFound {
            addr: addr.to_string(),
            ep_id,
        })
}

/// Source endpoint for traffic to a remote endpoint: the delegator for the
/// destination profile when one exists, else any local endpoint.
fn source_for(inner: &ShepherdInner, profile_id: u16) -> Result<EndpointRef, ShepherdError> {
    let coord = inner.coordinator().ok_or(ShepherdError::CoordinatorNotReady)?;
    let ep = coord
        .delegator_for(profile_id)
        .or_else(|| coord.endpoints.values().find(|e| e.local))
        .ok_or(ShepherdError::CoordinatorNotReady)?;
    Ok(endpoint_ref(&coord, ep))
}

fn delegator_ref(inner: &ShepherdInner, profile_id: u16) -> Result<EndpointRef, ShepherdError> {
    let coord = inner.coordinator().ok_or(ShepherdError::CoordinatorNotReady)?;
    let ep = coord
        .delegator_for(profile_id)
        .ok_or(ShepherdError::ProfileUnsupported(profile_id))?;
    Ok(endpoint_ref(&coord, ep))
}

fn resolve_cluster_arg(key: ZclKey<'_>) -> Result<(u16, String), ShepherdError> {
    catalog::resolve_cluster(key)
        .ok_or_else(|| ShepherdError::UnknownId(format!("cluster {key:?}")))
}

fn resolve_attr_arg(cluster_id: u16, key: ZclKey<'_>) -> Result<(u16, String), ShepherdError> {
    catalog::resolve_attr(cluster_id, key)
        .ok_or_else(|| ShepherdError::UnknownId(format!("attribute {key:?}")))
}

fn first_record(payload: &ZclPayload) -> Result<&StatusRecord, ShepherdError> {
    payload
        .records()
        .and_then(|r| r.first())
        .ok_or_else(|| ShepherdError::BadResponse("empty foundation response".to_string()))
}

/// Issue a foundation command and run its cache post-processing.
pub(crate) async fn foundation(
    inner: &Arc<ShepherdInner>,
    src: &EndpointRef,
    dst: &EndpointRef,
    cluster_id: u16,
    cluster_key: &str,
    cmd: FoundationCmd,
    records: Vec<AttrRecord>,
    cfg: &ZclConfig,
) -> Result<ZclPayload, ShepherdError> {
    let payload = inner
        .af
        .zcl_foundation(src, dst, cluster_id, cmd, records, cfg)
        .await?;

    match cmd {
        // the response carries the values
        FoundationCmd::Read => {
            if let Some(recs) = payload.records() {
                finalize_records(inner, dst, cluster_id, cluster_key, recs).await;
            }
        }
        // writes answer with statuses only; re-query the cluster
        FoundationCmd::Write | FoundationCmd::WriteUndiv | FoundationCmd::WriteNoRsp => {
            refresh_cluster(inner, dst, cluster_id, cluster_key).await;
        }
        _ => {}
    }
    Ok(payload)
}

/// Issue a functional command; the cache is refreshed only on request.
pub(crate) async fn functional(
    inner: &Arc<ShepherdInner>,
    src: &EndpointRef,
    dst: &EndpointRef,
    cluster_id: u16,
    cluster_key: &str,
    cmd: &str,
    args: Value,
    cfg: &ZclConfig,
) -> Result<ZclPayload, ShepherdError> {
    let payload = inner
        .af
        .zcl_functional(src, dst, cluster_id, cmd, args, cfg)
        .await?;
    if !cfg.skip_finalize {
        refresh_cluster(inner, dst, cluster_id, cluster_key).await;
    }
    Ok(payload)
}

/// Fold read-response records into the cache; emit the diff. Cache failures
/// (the device vanished mid-request) do not fail the request itself.
async fn finalize_records(
    inner: &Arc<ShepherdInner>,
    dst: &EndpointRef,
    cluster_id: u16,
    cluster_key: &str,
    records: &[StatusRecord],
) {
    match inner.registry.apply_attr_records(
        &dst.ieee_addr,
        dst.ep_id,
        cluster_id,
        cluster_key,
        records,
        AttrSource::Response,
    ) {
        Ok(diff) if !diff.is_empty() => {
            if let Err(e) = inner.registry.sync_one(&dst.ieee_addr).await {
                tracing::warn!(ieee = %dst.ieee_addr, error = %e, "cache sync failed");
            }
            inner.emit(ShepherdEvent::Ind(Ind::DevChange {
                ieee_addr: dst.ieee_addr.clone(),
                ep_id: dst.ep_id,
                cluster: cluster_key.to_string(),
                data: diff,
            }));
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(ieee = %dst.ieee_addr, error = %e, "cache update dropped");
        }
    }
}

/// Re-read a whole cluster through the AF layer and merge the snapshot.
async fn refresh_cluster(
    inner: &Arc<ShepherdInner>,
    dst: &EndpointRef,
    cluster_id: u16,
    cluster_key: &str,
) {
    let attrs = match inner.af.zcl_cluster_attrs(dst, cluster_id).await {
        Ok(attrs) => attrs,
        Err(e) => {
            tracing::warn!(ieee = %dst.ieee_addr, cluster = cluster_key, error = %e, "cluster refresh failed");
            return;
        }
    };
    match inner
        .registry
        .apply_attr_snapshot(&dst.ieee_addr, dst.ep_id, cluster_key, attrs)
    {
        Ok(diff) if !diff.is_empty() => {
            if let Err(e) = inner.registry.sync_one(&dst.ieee_addr).await {
                tracing::warn!(ieee = %dst.ieee_addr, error = %e, "cache sync failed");
            }
            inner.emit(ShepherdEvent::Ind(Ind::DevChange {
                ieee_addr: dst.ieee_addr.clone(),
                ep_id: dst.ep_id,
                cluster: cluster_key.to_string(),
                data: diff,
            }));
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(ieee = %dst.ieee_addr, error = %e, "cache update dropped");
        }
    }
}

/// ZCL capability onto a remote endpoint.
///
/// The handle stores addresses, not registry state; destinations are
/// resolved per call so a changed network address is picked up.
#[derive(Clone)]
pub struct EndpointHandle {
    inner: Arc<ShepherdInner>,
    ieee_addr: String,
    ep_id: u8,
}

impl EndpointHandle {
    pub(crate) fn new(inner: Arc<ShepherdInner>, ieee_addr: String, ep_id: u8) -> Self {
        Self {
            inner,
            ieee_addr,
            ep_id,
        }
    }

    pub fn ieee_addr(&self) -> &str {
        &self.ieee_addr
    }

    pub fn ep_id(&self) -> u8 {
        self.ep_id
    }

    fn dst(&self) -> Result<EndpointRef, ShepherdError> {
        resolve_dst(&self.inner, &Addr::Ieee(self.ieee_addr.clone()), self.ep_id)
    }

    /// Issue a generic ZCL command against this endpoint.
    pub async fn foundation<'a>(
        &self,
        cluster: impl Into<ZclKey<'a>>,
        cmd: FoundationCmd,
        records: Vec<AttrRecord>,
        cfg: &ZclConfig,
    ) -> Result<ZclPayload, ShepherdError> {
        let (cluster_id, cluster_key) = resolve_cluster_arg(cluster.into())?;
        let dst = self.dst()?;
        let src = source_for(&self.inner, dst.profile_id)?;
        foundation(
            &self.inner,
            &src,
            &dst,
            cluster_id,
            &cluster_key,
            cmd,
            records,
            cfg,
        )
        .await
    }

    /// Issue a cluster-specific command against this endpoint.
    pub async fn functional<'a>(
        &self,
        cluster: impl Into<ZclKey<'a>>,
        cmd: &str,
        args: Value,
        cfg: &ZclConfig,
    ) -> Result<ZclPayload, ShepherdError> {
        let (cluster_id, cluster_key) = resolve_cluster_arg(cluster.into())?;
        let dst = self.dst()?;
        let src = source_for(&self.inner, dst.profile_id)?;
        functional(
            &self.inner,
            &src,
            &dst,
            cluster_id,
            &cluster_key,
            cmd,
            args,
            cfg,
        )
        .await
    }

    /// Read one attribute; resolves to its value on status 0.
    pub async fn read<'a>(
        &self,
        cluster: impl Into<ZclKey<'a>>,
        attr: impl Into<ZclKey<'a>>,
    ) -> Result<Value, ShepherdError> {
        let (cluster_id, cluster_key) = resolve_cluster_arg(cluster.into())?;
        let (attr_id, _) = resolve_attr_arg(cluster_id, attr.into())?;
        let dst = self.dst()?;
        let src = source_for(&self.inner, dst.profile_id)?;
        let payload = foundation(
            &self.inner,
            &src,
            &dst,
            cluster_id,
            &cluster_key,
            FoundationCmd::Read,
            vec![AttrRecord::read(attr_id)],
            &ZclConfig::default(),
        )
        .await?;
        let rec = first_record(&payload)?;
        if rec.status == 0 {
            Ok(rec.attr_data.clone().unwrap_or(Value::Null))
        } else {
            Err(ShepherdError::RequestUnsuccess(rec.status))
        }
    }

    /// Write one attribute; resolves to the written value on status 0.
    pub async fn write<'a>(
        &self,
        cluster: impl Into<ZclKey<'a>>,
        attr: impl Into<ZclKey<'a>>,
        data: Value,
    ) -> Result<Value, ShepherdError> {
        let (cluster_id, cluster_key) = resolve_cluster_arg(cluster.into())?;
        let (attr_id, attr_key) = resolve_attr_arg(cluster_id, attr.into())?;
        let data_type = catalog::attr_type(cluster_id, attr_id).ok_or_else(|| {
            ShepherdError::UnknownId(format!("{cluster_key}/{attr_key} data type"))
        })?;
        let dst = self.dst()?;
        let src = source_for(&self.inner, dst.profile_id)?;
        let payload = foundation(
            &self.inner,
            &src,
            &dst,
            cluster_id,
            &cluster_key,
            FoundationCmd::Write,
            vec![AttrRecord::write(attr_id, data_type, data.clone())],
            &ZclConfig::default(),
        )
        .await?;
        let rec = first_record(&payload)?;
        if rec.status == 0 {
            Ok(data)
        } else {
            Err(ShepherdError::RequestUnsuccess(rec.status))
        }
    }

    /// Bind a cluster of this endpoint to another endpoint.
    pub async fn bind<'a>(
        &self,
        cluster: impl Into<ZclKey<'a>>,
        target: &EndpointHandle,
    ) -> Result<(), ShepherdError> {
        let (cluster_id, _) = resolve_cluster_arg(cluster.into())?;
        let src = self.dst()?;
        let dst = target.dst()?;
        self.inner.controller.bind(&src, cluster_id, &dst).await
    }

    pub async fn unbind<'a>(
        &self,
        cluster: impl Into<ZclKey<'a>>,
        target: &EndpointHandle,
    ) -> Result<(), ShepherdError> {
        let (cluster_id, _) = resolve_cluster_arg(cluster.into())?;
        let src = self.dst()?;
        let dst = target.dst()?;
        self.inner.controller.unbind(&src, cluster_id, &dst).await
    }

    /// Configure attribute reporting: bind the cluster to the delegator for
    /// this endpoint's profile, then issue `configReport`.
    pub async fn report<'a>(
        &self,
        cluster: impl Into<ZclKey<'a>>,
        attr: impl Into<ZclKey<'a>>,
        min_rep_intval: u16,
        max_rep_intval: u16,
        rep_change: Value,
    ) -> Result<(), ShepherdError> {
        let (cluster_id, cluster_key) = resolve_cluster_arg(cluster.into())?;
        let (attr_id, attr_key) = resolve_attr_arg(cluster_id, attr.into())?;
        let dst = self.dst()?;
        let delegator = delegator_ref(&self.inner, dst.profile_id)?;
        self.inner
            .controller
            .bind(&dst, cluster_id, &delegator)
            .await?;

        let data_type = catalog::attr_type(cluster_id, attr_id).ok_or_else(|| {
            ShepherdError::UnknownId(format!("{cluster_key}/{attr_key} data type"))
        })?;
        let payload = foundation(
            &self.inner,
            &delegator,
            &dst,
            cluster_id,
            &cluster_key,
            FoundationCmd::ConfigReport,
            vec![AttrRecord::config_report(
                attr_id,
                data_type,
                min_rep_intval,
                max_rep_intval,
                rep_change,
            )],
            &ZclConfig::default(),
        )
        .await?;
        // an empty record list means every attribute was accepted
        if let Some(rec) = payload.records().and_then(|r| r.iter().find(|r| r.status != 0)) {
            return Err(ShepherdError::RequestUnsuccess(rec.status));
        }
        Ok(())
    }

    /// The bind-only half of `report`: route a cluster's reports to the
    /// delegator without configuring intervals.
    pub async fn report_bind<'a>(
        &self,
        cluster: impl Into<ZclKey<'a>>,
    ) -> Result<(), ShepherdError> {
        let (cluster_id, _) = resolve_cluster_arg(cluster.into())?;
        let dst = self.dst()?;
        let delegator = delegator_ref(&self.inner, dst.profile_id)?;
        self.inner.controller.bind(&dst, cluster_id, &delegator).await
    }
}

/// ZCL capability onto a mounted application's own endpoint; destinations
/// are addressed per call and resolved through the registry.
#[derive(Clone)]
pub struct AppHandle {
    inner: Arc<ShepherdInner>,
    ep_id: u8,
}

impl AppHandle {
    pub(crate) fn new(inner: Arc<ShepherdInner>, ep_id: u8) -> Self {
        Self { inner, ep_id }
    }

    /// The coordinator endpoint assigned at mount.
    pub fn ep_id(&self) -> u8 {
        self.ep_id
    }

    fn src(&self) -> Result<EndpointRef, ShepherdError> {
        let coord_ieee = self
            .inner
            .coord_ieee()
            .ok_or(ShepherdError::CoordinatorNotReady)?;
        resolve_dst(&self.inner, &Addr::Ieee(coord_ieee), self.ep_id)
    }

    fn resolve(&self, addr: &Addr, ep_id: u8) -> Result<EndpointRef, ShepherdError> {
        resolve_dst(&self.inner, addr, ep_id).map_err(|e| match e {
            ShepherdError::DeviceNotFound(addr) => ShepherdError::EndpointNotFound { addr, ep_id },
            other => other,
        })
    }

    pub async fn foundation<'a>(
        &self,
        dst_addr: impl Into<Addr>,
        dst_ep_id: u8,
        cluster: impl Into<ZclKey<'a>>,
        cmd: FoundationCmd,
        records: Vec<AttrRecord>,
        cfg: &ZclConfig,
    ) -> Result<ZclPayload, ShepherdError> {
        let (cluster_id, cluster_key) = resolve_cluster_arg(cluster.into())?;
        let src = self.src()?;
        let dst = self.resolve(&dst_addr.into(), dst_ep_id)?;
        foundation(
            &self.inner,
            &src,
            &dst,
            cluster_id,
            &cluster_key,
            cmd,
            records,
            cfg,
        )
        .await
    }

    pub async fn functional<'a>(
        &self,
        dst_addr: impl Into<Addr>,
        dst_ep_id: u8,
        cluster: impl Into<ZclKey<'a>>,
        cmd: &str,
        args: Value,
        cfg: &ZclConfig,
    ) -> Result<ZclPayload, ShepherdError> {
        let (cluster_id, cluster_key) = resolve_cluster_arg(cluster.into())?;
        let src = self.src()?;
        let dst = self.resolve(&dst_addr.into(), dst_ep_id)?;
        functional(
            &self.inner,
            &src,
            &dst,
            cluster_id,
            &cluster_key,
            cmd,
            args,
            cfg,
        )
        .await
    }
}
