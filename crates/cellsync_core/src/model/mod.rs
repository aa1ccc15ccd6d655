//! Domain model for cell membership partitioning.
//!
//! # Responsibility
//! - Define people, groups and the partition of one period into groups.
//! - Keep identity types explicit: provisional and persistent group ids are
//!   distinct variants, roles are a closed enum.
//!
//! # Invariants
//! - Every person of the active period sits in exactly one place.
//! - Only the placement engine mutates a `Partition`.

pub mod group;
pub mod partition;
pub mod person;
