//! Versioned response stores.
//!
//! This module provides the persistent side of the cache:
//! - A storage backend trait with a SQLite implementation
//! - Named stores keyed by `<name>-v<N>`, one per generation
//! - A store manager that seeds stores from a manifest and deletes stale ones

mod manager;
mod storage;
mod store;

pub use manager::StoreManager;
pub use storage::{CacheStorage, CachedEntry, SqliteStorage};
pub use store::{Store, StoreId};
