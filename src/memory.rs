//! In-process provider with optional JSON persistence.
//!
//! [`MemoryProvider`] keeps every record in one store guarded by a single
//! lock. Each lease transition runs as one read-modify-write under the write
//! lock, which gives the "one winner per key" guarantee the lease contract
//! asks providers for. Every change bumps a store-wide revision and is
//! published to the watchers of the changed scope.
//!
//! # Persistence
//!
//! When [`Config::store_file`] is set, the store is loaded on
//! [`open`](MemoryProvider::open) and written back at most once per
//! [`Config::save_interval_millis`] after lease changes, or immediately via
//! [`save`](MemoryProvider::save).
//!
//! # Thread Safety
//!
//! - [`RwLock`] for the store (concurrent reads, exclusive transitions)
//! - [`Mutex`] for the watcher registry
//! - [`tokio::sync::Mutex`] for file writes (prevents interleaved saves)

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::call::CallContext;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::hwaddr::HardwareAddr;
use crate::lease::{self, Lease, Transition};
use crate::model::{Device, Global, Instance, Mac, Network, Scope, Type};
use crate::provider::Provider;
use crate::watch::{
    GlobalWatcher, InstanceWatcher, NetworkWatcher, Notifier, WatchEvent, WatchEventKind,
    WatcherOptions,
};

/// Everything scoped to one network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkData {
    /// The network record itself; absent until `put_network` is called.
    pub config: Option<Network>,
    pub types: BTreeMap<String, Type>,
    pub devices: BTreeMap<String, Device>,
    pub macs: BTreeMap<HardwareAddr, Mac>,
    pub leases: BTreeMap<IpAddr, Lease>,
}

/// Persistent store format (serialized to JSON).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreData {
    /// Revision of the most recent change.
    pub revision: u64,
    pub global: Global,
    pub instances: BTreeMap<String, Instance>,
    pub networks: BTreeMap<String, NetworkData>,
    pub types: BTreeMap<String, Type>,
    pub devices: BTreeMap<String, Device>,
    pub macs: BTreeMap<HardwareAddr, Mac>,
}

#[derive(Debug)]
struct State {
    data: StoreData,
    /// Whether state has changed since last save.
    dirty: bool,
    last_save: Instant,
}

#[derive(Debug)]
struct Watchers {
    history: usize,
    global: Notifier<Global>,
    instances: HashMap<String, Notifier<Instance>>,
    networks: HashMap<String, Notifier<Network>>,
}

impl Watchers {
    fn instance(&mut self, id: &str) -> &Notifier<Instance> {
        let history = self.history;
        self.instances
            .entry(id.to_string())
            .or_insert_with(|| Notifier::new(history))
    }

    fn network(&mut self, id: &str) -> &Notifier<Network> {
        let history = self.history;
        self.networks
            .entry(id.to_string())
            .or_insert_with(|| Notifier::new(history))
    }

    /// Drops the notifiers of absent scopes that nobody watches.
    fn prune(&mut self, data: &StoreData) {
        self.instances.retain(|id, notifier| {
            notifier.watcher_count() > 0 || data.instances.contains_key(id)
        });
        self.networks.retain(|id, notifier| {
            notifier.watcher_count() > 0
                || data
                    .networks
                    .get(id)
                    .is_some_and(|scoped| scoped.config.is_some())
        });
    }
}

fn event<T>(revision: u64, value: Option<T>) -> WatchEvent<T> {
    let kind = if value.is_some() {
        WatchEventKind::Put
    } else {
        WatchEventKind::Delete
    };
    WatchEvent {
        revision,
        kind,
        value,
    }
}

/// A [`Provider`] backed by process memory.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use netdhcp::{GlobalContext, MemoryProvider, Network};
///
/// let provider = Arc::new(MemoryProvider::new());
/// provider.put_network(Network {
///     id: "wen".to_string(),
///     ..Default::default()
/// });
/// let gc = GlobalContext::new(provider);
/// ```
#[derive(Debug)]
pub struct MemoryProvider {
    state: RwLock<State>,
    watchers: Mutex<Watchers>,
    config: Arc<Config>,
    /// Mutex to prevent concurrent file writes.
    save_lock: tokio::sync::Mutex<()>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    /// Creates an empty provider with the default configuration and no persistence.
    pub fn new() -> Self {
        Self::from_data(StoreData::default(), Arc::new(Config::default()))
    }

    pub fn from_data(data: StoreData, config: Arc<Config>) -> Self {
        let history = config.watch_history;
        Self {
            state: RwLock::new(State {
                data,
                dirty: false,
                last_save: Instant::now(),
            }),
            watchers: Mutex::new(Watchers {
                history,
                global: Notifier::new(history),
                instances: HashMap::new(),
                networks: HashMap::new(),
            }),
            config,
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Creates a provider, loading the configured store file if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store file exists but cannot be read or parsed.
    pub async fn open(config: Arc<Config>) -> Result<Self> {
        let data = match &config.store_file {
            Some(path) => Self::load_store(path).await?,
            None => StoreData::default(),
        };
        Ok(Self::from_data(data, config))
    }

    async fn load_store<P: AsRef<Path>>(path: P) -> Result<StoreData> {
        let path = path.as_ref();
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let data: StoreData = serde_json::from_str(&content)?;
            info!(
                "Loaded store from {} at revision {}",
                path.display(),
                data.revision
            );
            Ok(data)
        } else {
            Ok(StoreData::default())
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Revision of the most recent change.
    pub fn revision(&self) -> u64 {
        self.state.read().data.revision
    }

    /// Returns a copy of the whole store.
    pub fn snapshot(&self) -> StoreData {
        self.state.read().data.clone()
    }

    /// Applies `change` under the write lock and returns the new revision.
    fn commit<F>(&self, change: F) -> u64
    where
        F: FnOnce(&mut StoreData, u64),
    {
        let mut state = self.state.write();
        let revision = state.data.revision + 1;
        change(&mut state.data, revision);
        state.data.revision = revision;
        state.dirty = true;
        revision
    }

    pub fn put_global(&self, global: Global) -> u64 {
        self.commit(|data, revision| {
            data.global = global.clone();
            self.watchers
                .lock()
                .global
                .publish(event(revision, Some(global)));
        })
    }

    pub fn put_instance(&self, instance: Instance) -> u64 {
        self.commit(|data, revision| {
            let id = instance.id.clone();
            data.instances.insert(id.clone(), instance.clone());
            self.watchers
                .lock()
                .instance(&id)
                .publish(event(revision, Some(instance)));
        })
    }

    /// Removes an instance, returning false if it did not exist.
    pub fn delete_instance(&self, id: &str) -> bool {
        let mut removed = false;
        self.commit(|data, revision| {
            removed = data.instances.remove(id).is_some();
            if removed {
                let mut watchers = self.watchers.lock();
                if let Some(notifier) = watchers.instances.get(id) {
                    notifier.publish(event(revision, None));
                }
                watchers.prune(data);
            }
        });
        removed
    }

    pub fn put_network(&self, network: Network) -> u64 {
        self.commit(|data, revision| {
            let id = network.id.clone();
            data.networks.entry(id.clone()).or_default().config = Some(network.clone());
            self.watchers
                .lock()
                .network(&id)
                .publish(event(revision, Some(network)));
        })
    }

    /// Removes a network with all of its types, devices, MAC records, and leases.
    pub fn delete_network(&self, id: &str) -> bool {
        let mut removed = false;
        self.commit(|data, revision| {
            removed = data.networks.remove(id).is_some();
            if removed {
                let mut watchers = self.watchers.lock();
                if let Some(notifier) = watchers.networks.get(id) {
                    notifier.publish(event(revision, None));
                }
                watchers.prune(data);
            }
        });
        removed
    }

    /// Stores a type, globally or on `network`.
    pub fn put_type(&self, network: Option<&str>, ty: Type) -> u64 {
        self.commit(|data, _| {
            let types = match network {
                Some(network) => &mut data.networks.entry(network.to_string()).or_default().types,
                None => &mut data.types,
            };
            types.insert(ty.id.clone(), ty);
        })
    }

    pub fn delete_type(&self, network: Option<&str>, id: &str) -> bool {
        let mut removed = false;
        self.commit(|data, _| {
            removed = match network {
                Some(network) => data
                    .networks
                    .get_mut(network)
                    .is_some_and(|scoped| scoped.types.remove(id).is_some()),
                None => data.types.remove(id).is_some(),
            };
        });
        removed
    }

    /// Stores a device, globally or on `network`.
    pub fn put_device(&self, network: Option<&str>, device: Device) -> u64 {
        self.commit(|data, _| {
            let devices = match network {
                Some(network) => {
                    &mut data.networks.entry(network.to_string()).or_default().devices
                }
                None => &mut data.devices,
            };
            devices.insert(device.id.clone(), device);
        })
    }

    pub fn delete_device(&self, network: Option<&str>, id: &str) -> bool {
        let mut removed = false;
        self.commit(|data, _| {
            removed = match network {
                Some(network) => data
                    .networks
                    .get_mut(network)
                    .is_some_and(|scoped| scoped.devices.remove(id).is_some()),
                None => data.devices.remove(id).is_some(),
            };
        });
        removed
    }

    /// Stores MAC overrides, globally or on `network`.
    pub fn put_mac(&self, network: Option<&str>, mac: Mac) -> u64 {
        self.commit(|data, _| {
            let macs = match network {
                Some(network) => &mut data.networks.entry(network.to_string()).or_default().macs,
                None => &mut data.macs,
            };
            macs.insert(mac.addr.clone(), mac);
        })
    }

    pub fn delete_mac(&self, network: Option<&str>, addr: &HardwareAddr) -> bool {
        let mut removed = false;
        self.commit(|data, _| {
            removed = match network {
                Some(network) => data
                    .networks
                    .get_mut(network)
                    .is_some_and(|scoped| scoped.macs.remove(addr).is_some()),
                None => data.macs.remove(addr).is_some(),
            };
        });
        removed
    }

    /// Runs one lease transition atomically.
    ///
    /// Rejected transitions leave the store and its revision untouched.
    fn transition<F>(&self, network: &str, ip: IpAddr, decide: F) -> bool
    where
        F: FnOnce(Option<&Lease>, DateTime<Utc>) -> Transition,
    {
        let mut state = self.state.write();
        let now = Utc::now();

        let current = state
            .data
            .networks
            .get(network)
            .and_then(|scoped| scoped.leases.get(&ip));
        let transition = decide(current, now);
        if !transition.is_accepted() {
            return false;
        }

        let leases = &mut state
            .data
            .networks
            .entry(network.to_string())
            .or_default()
            .leases;
        match transition {
            Transition::Put(lease) => {
                leases.insert(ip, lease);
            }
            Transition::Remove => {
                leases.remove(&ip);
            }
            Transition::Reject => {}
        }

        state.data.revision += 1;
        state.dirty = true;
        true
    }

    /// Writes the store once it is dirty and the save interval has elapsed.
    ///
    /// A failed write is logged and leaves the store dirty for the next try.
    async fn maybe_save(&self) {
        let Some(path) = &self.config.store_file else {
            return;
        };

        let snapshot = {
            let mut state = self.state.write();
            if !state.dirty
                || state.last_save.elapsed().as_millis() < self.config.save_interval_millis as u128
            {
                return;
            }
            state.dirty = false;
            state.last_save = Instant::now();
            state.data.clone()
        };

        let _lock = self.save_lock.lock().await;
        match Self::write_store(path, &snapshot).await {
            Ok(()) => debug!("Saved store at revision {}", snapshot.revision),
            Err(error) => {
                warn!("Failed to save store to {}: {}", path, error);
                self.state.write().dirty = true;
            }
        }
    }

    async fn write_store(path: &str, data: &StoreData) -> Result<()> {
        let content = serde_json::to_string_pretty(data)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Forces an immediate save of the store to the configured file.
    ///
    /// Does nothing when no store file is configured.
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.config.store_file else {
            return Ok(());
        };

        let snapshot = self.snapshot();
        let _lock = self.save_lock.lock().await;
        Self::write_store(path, &snapshot).await?;

        let mut state = self.state.write();
        state.dirty = false;
        state.last_save = Instant::now();
        info!("Saved store to {} at revision {}", path, snapshot.revision);

        Ok(())
    }

    /// Returns all leases and holds (including expired ones), optionally for one network.
    pub fn list_leases(&self, network: Option<&str>) -> Vec<Lease> {
        let state = self.state.read();
        state
            .data
            .networks
            .iter()
            .filter(|(id, _)| network.is_none_or(|wanted| wanted == id.as_str()))
            .flat_map(|(_, scoped)| scoped.leases.values().cloned())
            .collect()
    }

    /// Returns the count of unexpired leases and holds.
    pub fn active_lease_count(&self) -> usize {
        let now = Utc::now();
        let state = self.state.read();
        state
            .data
            .networks
            .values()
            .flat_map(|scoped| scoped.leases.values())
            .filter(|lease| !lease.is_expired(now))
            .count()
    }

    /// Removes all expired leases and holds.
    ///
    /// Returns the number of records removed.
    pub async fn cleanup_expired_leases(&self) -> Result<usize> {
        let now = Utc::now();
        let count = {
            let mut state = self.state.write();
            let mut count = 0;
            for scoped in state.data.networks.values_mut() {
                let before = scoped.leases.len();
                scoped.leases.retain(|_, lease| !lease.is_expired(now));
                count += before - scoped.leases.len();
            }
            if count > 0 {
                state.data.revision += 1;
                state.dirty = true;
            }
            count
        };

        if count > 0 {
            info!("Removed {} expired lease(s)", count);
            self.save().await?;
        }
        Ok(count)
    }

    fn read_scoped<T, F>(&self, ctx: &CallContext, scope: Scope, find: F) -> Result<T>
    where
        F: FnOnce(&StoreData) -> Option<T>,
    {
        if let Some(error) = ctx.err() {
            return Err(error);
        }
        let state = self.state.read();
        find(&state.data).ok_or(Error::NotFound(scope))
    }

    fn check(ctx: &CallContext) -> Result<()> {
        match ctx.err() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn global(&self, ctx: &CallContext) -> Result<Global> {
        self.read_scoped(ctx, Scope::Global, |data| Some(data.global.clone()))
    }

    async fn instance(&self, ctx: &CallContext, id: &str) -> Result<Instance> {
        self.read_scoped(ctx, Scope::Instance(id.to_string()), |data| {
            data.instances.get(id).cloned()
        })
    }

    async fn network(&self, ctx: &CallContext, id: &str) -> Result<Network> {
        self.read_scoped(ctx, Scope::Network(id.to_string()), |data| {
            data.networks.get(id).and_then(|scoped| scoped.config.clone())
        })
    }

    async fn global_type(&self, ctx: &CallContext, id: &str) -> Result<Type> {
        let scope = Scope::Type {
            network: None,
            id: id.to_string(),
        };
        self.read_scoped(ctx, scope, |data| data.types.get(id).cloned())
    }

    async fn network_type(&self, ctx: &CallContext, network: &str, id: &str) -> Result<Type> {
        let scope = Scope::Type {
            network: Some(network.to_string()),
            id: id.to_string(),
        };
        self.read_scoped(ctx, scope, |data| {
            data.networks
                .get(network)
                .and_then(|scoped| scoped.types.get(id).cloned())
        })
    }

    async fn global_device(&self, ctx: &CallContext, id: &str) -> Result<Device> {
        let scope = Scope::Device {
            network: None,
            id: id.to_string(),
        };
        self.read_scoped(ctx, scope, |data| data.devices.get(id).cloned())
    }

    async fn network_device(&self, ctx: &CallContext, network: &str, id: &str) -> Result<Device> {
        let scope = Scope::Device {
            network: Some(network.to_string()),
            id: id.to_string(),
        };
        self.read_scoped(ctx, scope, |data| {
            data.networks
                .get(network)
                .and_then(|scoped| scoped.devices.get(id).cloned())
        })
    }

    async fn global_mac(&self, ctx: &CallContext, addr: &HardwareAddr) -> Result<Mac> {
        let scope = Scope::Mac {
            network: None,
            addr: addr.clone(),
        };
        self.read_scoped(ctx, scope, |data| data.macs.get(addr).cloned())
    }

    async fn network_mac(
        &self,
        ctx: &CallContext,
        network: &str,
        addr: &HardwareAddr,
    ) -> Result<Mac> {
        let scope = Scope::Mac {
            network: Some(network.to_string()),
            addr: addr.clone(),
        };
        self.read_scoped(ctx, scope, |data| {
            data.networks
                .get(network)
                .and_then(|scoped| scoped.macs.get(addr).cloned())
        })
    }

    async fn network_lease(
        &self,
        ctx: &CallContext,
        network: &str,
        ip: IpAddr,
    ) -> Result<Option<Lease>> {
        Self::check(ctx)?;
        let state = self.state.read();
        Ok(state
            .data
            .networks
            .get(network)
            .and_then(|scoped| scoped.leases.get(&ip).cloned()))
    }

    async fn network_lease_create(
        &self,
        ctx: &CallContext,
        network: &str,
        ip: IpAddr,
        addr: &HardwareAddr,
        expiration: DateTime<Utc>,
    ) -> Result<bool> {
        Self::check(ctx)?;
        let ok = self.transition(network, ip, |current, now| {
            lease::create(current, network, ip, addr, expiration, now)
        });
        self.maybe_save().await;
        Ok(ok)
    }

    async fn network_lease_renew(
        &self,
        ctx: &CallContext,
        network: &str,
        ip: IpAddr,
        addr: &HardwareAddr,
        expiration: DateTime<Utc>,
    ) -> Result<bool> {
        Self::check(ctx)?;
        let ok = self.transition(network, ip, |current, now| {
            lease::renew(current, addr, expiration, now)
        });
        self.maybe_save().await;
        Ok(ok)
    }

    async fn network_lease_release(
        &self,
        ctx: &CallContext,
        network: &str,
        ip: IpAddr,
        addr: &HardwareAddr,
    ) -> Result<bool> {
        Self::check(ctx)?;
        let ok = self.transition(network, ip, |current, _| lease::release(current, addr));
        self.maybe_save().await;
        Ok(ok)
    }

    async fn network_lease_hold(
        &self,
        ctx: &CallContext,
        network: &str,
        ip: IpAddr,
    ) -> Result<bool> {
        Self::check(ctx)?;
        let duration = TimeDelta::seconds(i64::from(self.config.hold_duration_seconds));
        let ok = self.transition(network, ip, |current, now| {
            lease::hold(current, network, ip, now + duration, now)
        });
        self.maybe_save().await;
        Ok(ok)
    }

    fn global_watcher(&self, options: &WatcherOptions) -> GlobalWatcher {
        let state = self.state.read();
        let current = (state.data.revision, Some(state.data.global.clone()));
        self.watchers.lock().global.subscribe(options, current)
    }

    fn instance_watcher(&self, id: &str, options: &WatcherOptions) -> InstanceWatcher {
        let state = self.state.read();
        let current = (state.data.revision, state.data.instances.get(id).cloned());
        let mut watchers = self.watchers.lock();
        let watcher = watchers.instance(id).subscribe(options, current);
        watchers.prune(&state.data);
        watcher
    }

    fn network_watcher(&self, id: &str, options: &WatcherOptions) -> NetworkWatcher {
        let state = self.state.read();
        let current = (
            state.data.revision,
            state
                .data
                .networks
                .get(id)
                .and_then(|scoped| scoped.config.clone()),
        );
        let mut watchers = self.watchers.lock();
        let watcher = watchers.network(id).subscribe(options, current);
        watchers.prune(&state.data);
        watcher
    }
}
