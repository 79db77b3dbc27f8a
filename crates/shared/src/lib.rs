// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Tally Shared Types
//!
//! Cross-crate vocabulary (plan identifiers, capability tags) and database
//! pool/migration helpers used by the ledger core and the API server.

pub mod db;
pub mod plan;

pub use db::{create_pool, run_migrations};
pub use plan::{Capability, PlanId};
