//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection pool management
//! - Dialect strategy and parameterized statement building
//! - Statement execution and row decoding
//! - Units of work over pooled transactions
//! - Versioned schema migration
//! - Health probing
//! - Database dispatch macros for reducing code duplication

pub mod dialect;
pub mod executor;
pub mod health;
#[macro_use]
pub mod macros;
pub mod migrations;
pub mod migrator;
pub mod params;
pub mod pool;
pub mod row;
pub mod statement;
pub mod transaction;

pub use dialect::Dialect;
pub use executor::ExecOutcome;
pub use health::{HealthMonitor, HealthState};
pub use migrator::{Migration, MigrationReport, MigrationState, MigrationStatus, Migrator};
pub use params::SqlParam;
pub use pool::{DbPool, PoolManager, PoolStats, PooledConnection};
pub use row::{Column, ColumnKind, DbRow};
pub use statement::{Statement, StatementBuilder};
pub use transaction::{TransactionManager, UnitOfWork};
