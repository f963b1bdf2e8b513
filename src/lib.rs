//! OneOrder client-side entity cache.
//!
//! One [`EntityCacheManager`] per entity type owns the authoritative
//! in-memory collection, writes through to a durable local store, syncs
//! optimistically with the backend API, and broadcasts every change to
//! peer contexts through a pluggable change bus.
//!
//! The backend is never a correctness dependency: every mutation commits
//! locally even when the network call fails, and `load()` degrades from
//! the API to the local store to a built-in seed set.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ordercache::{
//!     ChangeBus, ChannelTransport, Config, EntityCacheManager, FileStore,
//!     HttpRemote, Protocol, StoreSignalTransport,
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let store = FileStore::new(config.data_dir()?)?;
//!
//! let hub = ChannelTransport::hub();
//! let bus = ChangeBus::new()
//!     .add_transport(ChannelTransport::new(&hub))
//!     .add_transport(StoreSignalTransport::new(store.signal_path("protocols")));
//!
//! let manager = Arc::new(
//!     EntityCacheManager::<Protocol>::new(store, bus)
//!         .with_remote(HttpRemote::new(config.api_base_url(), "internal-protocols")?),
//! );
//! manager.load().await;
//!
//! let refresher = ordercache::spawn_refresh(
//!     Arc::clone(&manager),
//!     std::time::Duration::from_secs(config.poll_interval_secs),
//! );
//! # refresher.abort();
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod audit;
pub mod bus;
pub mod config;
pub mod entity;
pub mod error;
pub mod manager;
pub mod models;
pub mod refresh;
pub mod store;

pub use api::{ApiError, HttpRemote, Remote};
pub use audit::{AuditAction, AuditEntry, FieldChange};
pub use bus::{ChangeBus, ChangeEvent, ChannelTransport, StoreSignalTransport, Transport};
pub use config::Config;
pub use entity::{Entity, OrderPolicy, StatusToggle};
pub use error::CacheError;
pub use manager::{
    DataSource, EntityCacheManager, SyncStatus, EVENT_CLEARED, EVENT_REPLACED, EVENT_UPDATED,
};
pub use models::{Notification, Protocol, User};
pub use refresh::{spawn_refresh, DEFAULT_POLL_SECS};
pub use store::{FileStore, StateEnvelope, StoreError};
