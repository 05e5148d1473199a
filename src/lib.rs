//! # netdhcp
//!
//! Configuration resolution and lease coordination for a DHCP service whose
//! data lives in a pluggable, possibly distributed store.
//!
//! ## Features
//!
//! - Layered configuration: global → network → instance → type → device → MAC
//! - Chainable scope contexts that validate before touching the store
//! - Deterministic last-writer-wins attribute merging
//! - Lease state machine (create, renew, release, hold) with one winner per address
//! - Per-scope change watchers with resume and initial-value options
//! - Cancellation and deadlines on every store call
//! - In-memory provider with JSON persistence
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use netdhcp::{CallContext, GlobalContext, MemoryProvider, resolve_network};
//!
//! #[tokio::main]
//! async fn main() -> netdhcp::Result<()> {
//!     let gc = GlobalContext::new(Arc::new(MemoryProvider::new()));
//!     let ctx = CallContext::background();
//!
//!     let addr = "aa:bb:cc:dd:ee:ff".parse()?;
//!     let resolution = resolve_network(&ctx, &gc, "wen", &addr).await?;
//!     println!("{:?}", resolution.attr);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`Provider`] - Storage, query, and watch capability set (external)
//! - [`GlobalContext`] - Root of the scope context chain
//! - [`merge`] - Attribute merge engine
//! - [`resolve_network`] / [`resolve_instance`] - Resolution workflow
//! - [`LeaseContext`] - Lease state machine entry point
//! - [`Watcher`] - Per-scope change notifications
//! - [`MemoryProvider`] - Reference provider backed by process memory

pub mod call;
pub mod config;
pub mod context;
pub mod error;
pub mod hwaddr;
pub mod lease;
pub mod memory;
pub mod merge;
pub mod model;
pub mod provider;
pub mod resolve;
pub mod watch;

pub use call::{CallContext, CancelHandle};
pub use config::Config;
pub use context::{
    DeviceContext, GlobalContext, InstanceContext, LeaseContext, MacContext, NetworkContext,
    TypeContext,
};
pub use error::{Error, Result};
pub use hwaddr::HardwareAddr;
pub use lease::{Lease, LeaseState};
pub use memory::MemoryProvider;
pub use merge::merge;
pub use model::{Attr, Device, Global, Instance, Mac, Network, Scope, Type};
pub use provider::Provider;
pub use resolve::{Resolution, resolve_instance, resolve_network};
pub use watch::{
    GlobalWatcher, InstanceWatcher, NetworkWatcher, WatchEvent, WatchEventKind, Watcher,
    WatcherOptions,
};
