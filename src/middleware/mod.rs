//! Middleware for request logging and rate limiting.
//!
//! This module provides:
//! - Request logging with latency tracking
//! - Fixed-window quotas per route group

pub mod logging;
pub mod rate_limit;

pub use logging::request_logging;
pub use rate_limit::{
    enforce_quota, CounterStore, InMemoryCounterStore, Limiters, QuotaEnforcer, RateLimitPolicy,
};

use axum::extract::{connect_info::MockConnectInfo, ConnectInfo};
use axum::http::Extensions;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Peer address of the connection. Falls back to the unspecified address
/// when the server was not started with connect info.
pub fn client_ip(extensions: &Extensions) -> IpAddr {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .or_else(|| {
            extensions
                .get::<MockConnectInfo<SocketAddr>>()
                .map(|MockConnectInfo(addr)| addr.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}
