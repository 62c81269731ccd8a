//! Lore store library.
//!
//! Persistence layer for a game-server lore plugin: pooled connections to
//! SQLite, PostgreSQL or MySQL, versioned schema migration, typed
//! repositories and an async gateway that keeps database work off the
//! host's main thread.

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod repository;
pub mod store;

pub use config::{Config, StoreConfig};
pub use error::{ErrorKind, StoreError, StoreResult};
pub use gateway::{AsyncGateway, AsyncRepository, HostExecutor, HostQueue, StoreFuture};
pub use repository::Repository;
pub use store::LoreStore;
