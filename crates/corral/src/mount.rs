//! Mount serializer
//!
//! Registering a local application claims one coordinator endpoint. Mounts
//! run strictly one at a time behind a fair lock, so concurrent callers
//! queue in FIFO order and a failing mount never blocks the next.

use std::sync::Arc;

use crate::device::{Addr, Endpoint};
use crate::error::ShepherdError;
use crate::request::AppHandle;
use crate::shepherd::{MountedApp, ShepherdInner};
use crate::zapp::ZApp;

pub(crate) async fn mount(
    inner: &Arc<ShepherdInner>,
    app: Arc<dyn ZApp>,
) -> Result<AppHandle, ShepherdError> {
    let _serial = inner.mount_lock.lock().await;

    let coord_ieee = inner
        .coord_ieee()
        .ok_or(ShepherdError::CoordinatorNotReady)?;
    let coord_addr = Addr::Ieee(coord_ieee.clone());

    {
        let apps = inner.apps.read().expect("apps lock");
        if apps.iter().any(|m| Arc::ptr_eq(&m.app, &app)) {
            return Err(ShepherdError::DuplicateMount);
        }
    }

    // endpoint ids 1-10 are reserved for delegators
    let max = inner
        .registry
        .with_device(&coord_addr, |d| {
            d.ep_list().into_iter().max().unwrap_or(0)
        })
        .ok_or(ShepherdError::CoordinatorNotReady)?;
    let ep_id = if max > 10 { max + 1 } else { 11 };

    let mut sd = app.descriptor();
    sd.ep_id = ep_id;
    let ep = Endpoint::local_from_descriptor(&sd);

    inner.registry.with_device_mut(&coord_addr, |d| {
        d.endpoints.insert(ep_id, ep.clone());
    });

    if let Err(e) = register_with_radio(inner, &ep, &coord_ieee).await {
        inner.registry.with_device_mut(&coord_addr, |d| {
            d.endpoints.remove(&ep_id);
        });
        tracing::warn!(ep = ep_id, error = %e, "mount failed");
        return Err(e);
    }

    inner
        .apps
        .write()
        .expect("apps lock")
        .push(MountedApp { app, ep_id });
    tracing::info!(ep = ep_id, "application mounted");
    Ok(AppHandle::new(Arc::clone(inner), ep_id))
}

async fn register_with_radio(
    inner: &Arc<ShepherdInner>,
    ep: &Endpoint,
    coord_ieee: &str,
) -> Result<(), ShepherdError> {
    inner.controller.register_ep(ep).await?;

    // the endpoint table changed: re-read the coordinator identifiers
    let info = inner.controller.coord_info().await?;
    inner
        .registry
        .with_device_mut(&Addr::Ieee(coord_ieee.to_string()), |d| {
            d.nwk_addr = info.nwk_addr;
        });
    inner.registry.sync_one(coord_ieee).await?;
    Ok(())
}
