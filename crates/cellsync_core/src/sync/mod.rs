//! Synchronization of an edited partition with persistent storage.
//!
//! # Responsibility
//! - Run the retire / materialize / update / batch phases against a gateway.
//! - Remember completed writes across retries of the same session.

pub mod coordinator;
pub mod ledger;
