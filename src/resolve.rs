//! Resolution of the effective configuration for one hardware address.
//!
//! Walks the scope chain, reads every applicable layer, and merges them in
//! precedence order:
//!
//! 1. global, then the network
//! 2. the instance, when resolving on behalf of an instance
//! 3. the type referenced by the MAC record (global, then network-local)
//! 4. the device referenced by the MAC record (global, then network-local)
//! 5. the MAC record itself (global, then network-local)
//!
//! A missing type, device, or MAC record contributes nothing. Any other
//! failure, including a missing global, instance, or network record, aborts
//! the resolution and is returned unchanged.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::call::CallContext;
use crate::context::{GlobalContext, NetworkContext};
use crate::error::Result;
use crate::hwaddr::HardwareAddr;
use crate::merge::merge_into;
use crate::model::{Attr, Mac, Scope};

/// Attribute holding the lease duration in seconds.
pub const LEASE_TIME: &str = "lease-time";

/// The effective configuration of one hardware address on one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub network: String,
    pub instance: Option<String>,
    pub addr: HardwareAddr,
    /// The most specific MAC record found (network-local before global).
    pub mac: Option<Mac>,
    pub attr: Attr,
    /// Scopes that contributed a record, least specific first.
    pub layers: Vec<Scope>,
}

impl Resolution {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attr.get(key).map(String::as_str)
    }

    /// Lease duration from the `lease-time` attribute, if set and numeric.
    pub fn lease_duration(&self) -> Option<Duration> {
        self.get(LEASE_TIME)?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }

    /// Expiration for a lease granted at `now`, using `default` when the
    /// configuration sets no usable `lease-time`.
    pub fn lease_expiration(&self, now: DateTime<Utc>, default: Duration) -> DateTime<Utc> {
        let duration = self.lease_duration().unwrap_or(default);
        let delta = TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX);
        now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Accumulates layers in precedence order.
#[derive(Debug, Default)]
struct Layers {
    attr: Attr,
    scopes: Vec<Scope>,
}

impl Layers {
    fn push(&mut self, scope: Scope, attr: &Attr) {
        merge_into(&mut self.attr, attr);
        self.scopes.push(scope);
    }
}

/// Awaits a read, mapping "not found" to `None`.
async fn optional<T>(read: impl Future<Output = Result<T>>) -> Result<Option<T>> {
    match read.await {
        Ok(value) => Ok(Some(value)),
        Err(error) if error.is_not_found() => Ok(None),
        Err(error) => Err(error),
    }
}

/// Resolves the configuration of `addr` on `network`.
pub async fn resolve_network(
    ctx: &CallContext,
    gc: &GlobalContext,
    network: &str,
    addr: &HardwareAddr,
) -> Result<Resolution> {
    let mut layers = Layers::default();

    let global = gc.read(ctx).await?;
    layers.push(Scope::Global, &global.attr);

    let nc = gc.network(network);
    let config = nc.read(ctx).await?;
    layers.push(nc.scope(), &config.attr);

    resolve_hardware(ctx, gc, &nc, None, addr, layers).await
}

/// Resolves the configuration of `addr` for a service instance.
///
/// The network is taken from the instance record; the instance layer is
/// merged directly after global and network.
pub async fn resolve_instance(
    ctx: &CallContext,
    gc: &GlobalContext,
    instance: &str,
    addr: &HardwareAddr,
) -> Result<Resolution> {
    let mut layers = Layers::default();

    let global = gc.read(ctx).await?;
    let ic = gc.instance(instance);
    let record = ic.read(ctx).await?;
    let nc = gc.network(record.network.as_str());
    let config = nc.read(ctx).await?;

    layers.push(Scope::Global, &global.attr);
    layers.push(nc.scope(), &config.attr);
    layers.push(ic.scope(), &record.attr);

    resolve_hardware(ctx, gc, &nc, Some(record.id), addr, layers).await
}

async fn resolve_hardware(
    ctx: &CallContext,
    gc: &GlobalContext,
    nc: &NetworkContext,
    instance: Option<String>,
    addr: &HardwareAddr,
    mut layers: Layers,
) -> Result<Resolution> {
    let global_mac = optional(gc.mac(addr.clone()).read(ctx)).await?;
    let network_mac = optional(nc.mac(addr.clone()).read(ctx)).await?;
    let mac = network_mac.as_ref().or(global_mac.as_ref());

    if let Some(ty) = mac.and_then(Mac::type_ref) {
        for tc in [gc.ty(ty), nc.ty(ty)] {
            if let Some(record) = optional(tc.read(ctx)).await? {
                layers.push(tc.scope(), &record.attr);
            }
        }
    }

    if let Some(device) = mac.and_then(Mac::device_ref) {
        for dc in [gc.device(device), nc.device(device)] {
            if let Some(record) = optional(dc.read(ctx)).await? {
                layers.push(dc.scope(), &record.attr);
            }
        }
    }

    if let Some(record) = &global_mac {
        layers.push(gc.mac(addr.clone()).scope(), &record.attr);
    }
    if let Some(record) = &network_mac {
        layers.push(nc.mac(addr.clone()).scope(), &record.attr);
    }

    debug!(
        "resolved [{}] on network {:?} from {} layer(s)",
        addr,
        nc.id(),
        layers.scopes.len()
    );

    let mac = network_mac.or(global_mac);
    Ok(Resolution {
        network: nc.id().to_string(),
        instance,
        addr: addr.clone(),
        mac,
        attr: layers.attr,
        layers: layers.scopes,
    })
}
