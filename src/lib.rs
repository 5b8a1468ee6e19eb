//! Blog backend library
//!
//! Accounts, bearer-token sessions with server-side revocation, role checks,
//! and per-route-group quotas. The binary in `main.rs` wires these together.

pub mod auth;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod middleware;
pub mod routes;
pub mod storage;
