//! Core use-case services.
//!
//! # Responsibility
//! - Route every partition mutation through `PlacementEngine`.
//! - Orchestrate hydration, bulk import and saving for one editing session.

pub mod bulk_import;
pub mod placement;
pub mod session;
