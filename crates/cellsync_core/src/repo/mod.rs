//! Persistence boundary for cell membership data.
//!
//! # Responsibility
//! - Define the gateway contract the engine hydrates from and synchronizes to.
//! - Keep SQL details out of the placement and sync layers.
//!
//! # Invariants
//! - Records leaving the gateway are normalized (disjoint slots).
//! - Gateway APIs return semantic errors (`GroupNotFound`, `UnknownPerson`)
//!   in addition to DB transport errors.

pub mod cell_repo;
pub mod sqlite_cell_repo;
