//! Domain modules organized as vertical slices.
//!
//! Each sub-module contains:
//! - `mod.rs` — Domain types and their invariants
//! - `wire.rs` — Raw serde structs matching broker params and results
//! - `state.rs` — State containers with update methods
//! - `client.rs` — Sub-client with RPC methods

pub mod balance;
pub mod payroll;
pub mod session;
pub mod transfer;
