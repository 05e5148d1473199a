//! The provider capability set.
//!
//! A [`Provider`] stores, retrieves, and watches every configuration record
//! and lease. The core only validates scopes and forwards calls; durability,
//! replication, and the atomicity of lease transitions are the provider's
//! responsibility.
//!
//! # Contract
//!
//! - Reads of a missing record fail with [`Error::NotFound`](crate::Error::NotFound),
//!   except [`network_lease`](Provider::network_lease), which returns `Ok(None)`.
//! - Lease mutations return `Ok(false)` for an expected conflict and reserve
//!   errors for system faults. Each one must be a single atomic
//!   read-modify-write against the shared store (a conditional write or
//!   transaction), so that at most one `create` wins per unexpired key. The
//!   transition rules in [`crate::lease`] describe the expected outcomes.
//! - Lease mutations run to completion once called. An implementation may
//!   fail with a cancellation error only before its commit point; after
//!   committing it reports the outcome. Failures of follow-up work such as
//!   persistence are logged, not returned.
//! - Watchers deliver changes of exactly the named scope.

use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::call::CallContext;
use crate::error::Result;
use crate::hwaddr::HardwareAddr;
use crate::lease::Lease;
use crate::model::{Device, Global, Instance, Mac, Network, Type};
use crate::watch::{GlobalWatcher, InstanceWatcher, NetworkWatcher, WatcherOptions};

#[async_trait]
pub trait Provider: Send + Sync + fmt::Debug {
    async fn global(&self, ctx: &CallContext) -> Result<Global>;

    async fn instance(&self, ctx: &CallContext, id: &str) -> Result<Instance>;

    async fn network(&self, ctx: &CallContext, id: &str) -> Result<Network>;

    async fn global_type(&self, ctx: &CallContext, id: &str) -> Result<Type>;

    async fn network_type(&self, ctx: &CallContext, network: &str, id: &str) -> Result<Type>;

    async fn global_device(&self, ctx: &CallContext, id: &str) -> Result<Device>;

    async fn network_device(&self, ctx: &CallContext, network: &str, id: &str) -> Result<Device>;

    async fn global_mac(&self, ctx: &CallContext, addr: &HardwareAddr) -> Result<Mac>;

    async fn network_mac(&self, ctx: &CallContext, network: &str, addr: &HardwareAddr)
    -> Result<Mac>;

    /// Returns the lease on `ip`, or `None` if the address is not leased or held.
    async fn network_lease(&self, ctx: &CallContext, network: &str, ip: IpAddr)
    -> Result<Option<Lease>>;

    async fn network_lease_create(
        &self,
        ctx: &CallContext,
        network: &str,
        ip: IpAddr,
        addr: &HardwareAddr,
        expiration: DateTime<Utc>,
    ) -> Result<bool>;

    async fn network_lease_renew(
        &self,
        ctx: &CallContext,
        network: &str,
        ip: IpAddr,
        addr: &HardwareAddr,
        expiration: DateTime<Utc>,
    ) -> Result<bool>;

    async fn network_lease_release(
        &self,
        ctx: &CallContext,
        network: &str,
        ip: IpAddr,
        addr: &HardwareAddr,
    ) -> Result<bool>;

    /// Reserves `ip` without binding it to a hardware address.
    async fn network_lease_hold(&self, ctx: &CallContext, network: &str, ip: IpAddr)
    -> Result<bool>;

    fn global_watcher(&self, options: &WatcherOptions) -> GlobalWatcher;

    fn instance_watcher(&self, id: &str, options: &WatcherOptions) -> InstanceWatcher;

    fn network_watcher(&self, id: &str, options: &WatcherOptions) -> NetworkWatcher;
}
