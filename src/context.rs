//! Scope contexts: chainable handles over the configuration hierarchy.
//!
//! A context names one node (global, instance, network, type, device, MAC,
//! or lease) and carries a shared reference to the [`Provider`]. Building a
//! context by navigation never fails and performs no I/O:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use std::net::{IpAddr, Ipv4Addr};
//! # use netdhcp::{CallContext, GlobalContext, HardwareAddr, MemoryProvider};
//! # async fn example() -> netdhcp::Result<()> {
//! let gc = GlobalContext::new(Arc::new(MemoryProvider::new()));
//! let ctx = CallContext::background();
//!
//! let wen = gc.network("wen.scj.io").read(&ctx).await?;
//! let digium = gc.network("wen.scj.io").ty("phone.digium").read(&ctx).await?;
//!
//! let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
//! let addr: HardwareAddr = "aa:bb:cc:dd:ee:ff".parse()?;
//! let expiration = chrono::Utc::now() + chrono::TimeDelta::hours(1);
//! let ok = gc.network("wen.scj.io").lease(ip).create(&ctx, &addr, expiration).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Each I/O operation validates the context first and fails with
//! [`Error::InvalidScope`] before the provider is called. Watchers are
//! validated the same way, so an invalid scope never opens a subscription.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::call::CallContext;
use crate::error::{Error, Result};
use crate::hwaddr::HardwareAddr;
use crate::lease::Lease;
use crate::model::{Device, Global, Instance, Mac, Network, Scope, Type};
use crate::provider::Provider;
use crate::watch::{GlobalWatcher, InstanceWatcher, NetworkWatcher, WatcherOptions};

fn invalid(scope: Scope) -> Error {
    debug!("rejecting invalid {}", scope);
    Error::InvalidScope(scope)
}

/// Entry point to all configuration data held by one provider.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    provider: Arc<dyn Provider>,
}

impl GlobalContext {
    /// Creates the root context over `provider`.
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    /// The provider every derived context shares.
    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Returns a copy of the global configuration.
    pub async fn read(&self, ctx: &CallContext) -> Result<Global> {
        ctx.run(self.provider.global(ctx)).await
    }

    /// Opens a watcher on the global configuration.
    pub fn watcher(&self, options: &WatcherOptions) -> GlobalWatcher {
        self.provider.global_watcher(options)
    }

    /// Returns a context for the service instance `id`.
    pub fn instance(&self, id: impl Into<String>) -> InstanceContext {
        InstanceContext {
            provider: Arc::clone(&self.provider),
            id: id.into(),
        }
    }

    /// Returns a context for the network `id`.
    pub fn network(&self, id: impl Into<String>) -> NetworkContext {
        NetworkContext {
            provider: Arc::clone(&self.provider),
            id: id.into(),
        }
    }

    /// Returns a context for the global type `id`.
    pub fn ty(&self, id: impl Into<String>) -> TypeContext {
        TypeContext {
            provider: Arc::clone(&self.provider),
            network: None,
            id: id.into(),
        }
    }

    /// Returns a context for the global device `id`.
    pub fn device(&self, id: impl Into<String>) -> DeviceContext {
        DeviceContext {
            provider: Arc::clone(&self.provider),
            network: None,
            id: id.into(),
        }
    }

    /// Returns a context for the global overrides of `addr`.
    pub fn mac(&self, addr: impl Into<HardwareAddr>) -> MacContext {
        MacContext {
            provider: Arc::clone(&self.provider),
            network: None,
            addr: addr.into(),
        }
    }
}

/// Configuration of one service instance.
#[derive(Debug, Clone)]
pub struct InstanceContext {
    provider: Arc<dyn Provider>,
    id: String,
}

impl InstanceContext {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn scope(&self) -> Scope {
        Scope::Instance(self.id.clone())
    }

    fn valid(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(invalid(self.scope()));
        }
        Ok(())
    }

    /// Returns a copy of the instance record.
    pub async fn read(&self, ctx: &CallContext) -> Result<Instance> {
        self.valid()?;
        ctx.run(self.provider.instance(ctx, &self.id)).await
    }

    /// Opens a watcher on the instance record.
    pub fn watcher(&self, options: &WatcherOptions) -> Result<InstanceWatcher> {
        self.valid()?;
        Ok(self.provider.instance_watcher(&self.id, options))
    }
}

/// Configuration, types, devices, MAC overrides, and leases of one network.
#[derive(Debug, Clone)]
pub struct NetworkContext {
    provider: Arc<dyn Provider>,
    id: String,
}

impl NetworkContext {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn scope(&self) -> Scope {
        Scope::Network(self.id.clone())
    }

    fn valid(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(invalid(self.scope()));
        }
        Ok(())
    }

    /// Returns a copy of the network record.
    pub async fn read(&self, ctx: &CallContext) -> Result<Network> {
        self.valid()?;
        ctx.run(self.provider.network(ctx, &self.id)).await
    }

    /// Opens a watcher on the network record; leases and scoped records
    /// are not reported.
    pub fn watcher(&self, options: &WatcherOptions) -> Result<NetworkWatcher> {
        self.valid()?;
        Ok(self.provider.network_watcher(&self.id, options))
    }

    /// Returns a context for the network-local type `id`.
    pub fn ty(&self, id: impl Into<String>) -> TypeContext {
        TypeContext {
            provider: Arc::clone(&self.provider),
            network: Some(self.id.clone()),
            id: id.into(),
        }
    }

    /// Returns a context for the network-local device `id`.
    pub fn device(&self, id: impl Into<String>) -> DeviceContext {
        DeviceContext {
            provider: Arc::clone(&self.provider),
            network: Some(self.id.clone()),
            id: id.into(),
        }
    }

    /// Returns a context for the overrides of `addr` on this network.
    pub fn mac(&self, addr: impl Into<HardwareAddr>) -> MacContext {
        MacContext {
            provider: Arc::clone(&self.provider),
            network: Some(self.id.clone()),
            addr: addr.into(),
        }
    }

    /// Returns a lease management context for `ip` on this network.
    pub fn lease(&self, ip: IpAddr) -> LeaseContext {
        LeaseContext {
            provider: Arc::clone(&self.provider),
            network: self.id.clone(),
            ip,
        }
    }
}

/// A hardware class, global or local to one network.
#[derive(Debug, Clone)]
pub struct TypeContext {
    provider: Arc<dyn Provider>,
    network: Option<String>,
    id: String,
}

impl TypeContext {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn network(&self) -> Option<&str> {
        self.network.as_deref()
    }

    pub fn scope(&self) -> Scope {
        Scope::Type {
            network: self.network.clone(),
            id: self.id.clone(),
        }
    }

    fn valid(&self) -> Result<()> {
        if self.id.is_empty() || self.network.as_deref() == Some("") {
            return Err(invalid(self.scope()));
        }
        Ok(())
    }

    pub async fn read(&self, ctx: &CallContext) -> Result<Type> {
        self.valid()?;
        match &self.network {
            Some(network) => {
                ctx.run(self.provider.network_type(ctx, network, &self.id))
                    .await
            }
            None => ctx.run(self.provider.global_type(ctx, &self.id)).await,
        }
    }
}

/// A device class, global or local to one network.
#[derive(Debug, Clone)]
pub struct DeviceContext {
    provider: Arc<dyn Provider>,
    network: Option<String>,
    id: String,
}

impl DeviceContext {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn network(&self) -> Option<&str> {
        self.network.as_deref()
    }

    pub fn scope(&self) -> Scope {
        Scope::Device {
            network: self.network.clone(),
            id: self.id.clone(),
        }
    }

    fn valid(&self) -> Result<()> {
        if self.id.is_empty() || self.network.as_deref() == Some("") {
            return Err(invalid(self.scope()));
        }
        Ok(())
    }

    pub async fn read(&self, ctx: &CallContext) -> Result<Device> {
        self.valid()?;
        match &self.network {
            Some(network) => {
                ctx.run(self.provider.network_device(ctx, network, &self.id))
                    .await
            }
            None => ctx.run(self.provider.global_device(ctx, &self.id)).await,
        }
    }
}

/// Overrides for one hardware address, global or on one network.
#[derive(Debug, Clone)]
pub struct MacContext {
    provider: Arc<dyn Provider>,
    network: Option<String>,
    addr: HardwareAddr,
}

impl MacContext {
    pub fn addr(&self) -> &HardwareAddr {
        &self.addr
    }

    pub fn network(&self) -> Option<&str> {
        self.network.as_deref()
    }

    pub fn scope(&self) -> Scope {
        Scope::Mac {
            network: self.network.clone(),
            addr: self.addr.clone(),
        }
    }

    fn valid(&self) -> Result<()> {
        if self.addr.is_empty() || self.network.as_deref() == Some("") {
            return Err(invalid(self.scope()));
        }
        Ok(())
    }

    pub async fn read(&self, ctx: &CallContext) -> Result<Mac> {
        self.valid()?;
        match &self.network {
            Some(network) => {
                ctx.run(self.provider.network_mac(ctx, network, &self.addr))
                    .await
            }
            None => ctx.run(self.provider.global_mac(ctx, &self.addr)).await,
        }
    }
}

/// Lease management for one IP address on one network.
///
/// Conflicts are reported as `Ok(false)`; see [`crate::lease`] for the
/// transition rules the provider applies. Mutations check the call context
/// before reaching the provider and are never abandoned afterwards, so an
/// `Ok` outcome or a cancellation error always agrees with the store.
#[derive(Debug, Clone)]
pub struct LeaseContext {
    provider: Arc<dyn Provider>,
    network: String,
    ip: IpAddr,
}

impl LeaseContext {
    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn scope(&self) -> Scope {
        Scope::Lease {
            network: self.network.clone(),
            ip: self.ip,
        }
    }

    fn valid(&self) -> Result<()> {
        if self.network.is_empty() || self.ip.is_unspecified() {
            return Err(invalid(self.scope()));
        }
        Ok(())
    }

    fn valid_with(&self, addr: &HardwareAddr) -> Result<()> {
        self.valid()?;
        if addr.is_empty() {
            debug!("rejecting empty hardware address for {}", self.scope());
            return Err(Error::InvalidAddress(self.scope()));
        }
        Ok(())
    }

    fn log_outcome(&self, operation: &str, ok: bool) {
        if ok {
            debug!("{} {} accepted", operation, self.scope());
        } else {
            debug!("{} {} rejected: conflicting lease", operation, self.scope());
        }
    }

    /// Returns the lease, or `None` if the address is neither leased nor held.
    pub async fn read(&self, ctx: &CallContext) -> Result<Option<Lease>> {
        self.valid()?;
        ctx.run(self.provider.network_lease(ctx, &self.network, self.ip))
            .await
    }

    /// Binds the address to `addr` until `expiration`.
    ///
    /// Returns `Ok(false)` if the address is held or leased to another
    /// hardware address, or if it would shorten `addr`'s own lease.
    pub async fn create(
        &self,
        ctx: &CallContext,
        addr: &HardwareAddr,
        expiration: DateTime<Utc>,
    ) -> Result<bool> {
        self.valid_with(addr)?;
        let ok = ctx
            .run_to_commit(
                self.provider
                    .network_lease_create(ctx, &self.network, self.ip, addr, expiration),
            )
            .await?;
        self.log_outcome("create", ok);
        Ok(ok)
    }

    /// Extends `addr`'s active lease to `expiration`.
    pub async fn renew(
        &self,
        ctx: &CallContext,
        addr: &HardwareAddr,
        expiration: DateTime<Utc>,
    ) -> Result<bool> {
        self.valid_with(addr)?;
        let ok = ctx
            .run_to_commit(
                self.provider
                    .network_lease_renew(ctx, &self.network, self.ip, addr, expiration),
            )
            .await?;
        self.log_outcome("renew", ok);
        Ok(ok)
    }

    /// Removes `addr`'s lease so the address becomes available.
    pub async fn release(&self, ctx: &CallContext, addr: &HardwareAddr) -> Result<bool> {
        self.valid_with(addr)?;
        let ok = ctx
            .run_to_commit(
                self.provider
                    .network_lease_release(ctx, &self.network, self.ip, addr),
            )
            .await?;
        self.log_outcome("release", ok);
        Ok(ok)
    }

    /// Reserves the address without binding it to a hardware address.
    ///
    /// Typically used by the DHCP service to set addresses aside for
    /// offline or static assignment.
    pub async fn hold(&self, ctx: &CallContext) -> Result<bool> {
        self.valid()?;
        let ok = ctx
            .run_to_commit(self.provider.network_lease_hold(ctx, &self.network, self.ip))
            .await?;
        self.log_outcome("hold", ok);
        Ok(ok)
    }
}
