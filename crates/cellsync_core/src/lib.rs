//! Core domain logic for cell membership partitioning.
//! This crate is the single source of truth for the partition invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod sync;

pub use config::{CellsyncConfig, ConfigError};
pub use db::{open_db, open_db_in_memory, DbError};
pub use logging::{default_log_level, init_logging, init_logging_from_config, logging_status};
pub use model::group::{Group, GroupId, GroupName, PersistentId, ProvisionalId, Role};
pub use model::partition::{InvariantViolation, Location, Partition, PartitionError};
pub use model::person::{MembershipStatus, Person, PersonId};
pub use repo::cell_repo::{CellGateway, GatewayError, GatewayResult, GroupRecord};
pub use repo::sqlite_cell_repo::SqliteCellRepository;
pub use service::bulk_import::{BulkTextResolver, ImportReport};
pub use service::placement::{PlacementEngine, PlacementError};
pub use service::session::{CellSession, SessionError};
pub use sync::coordinator::{SyncCoordinator, SyncError, SyncPhase, SyncReport};
pub use sync::ledger::SyncLedger;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
