//! # graceful-core
//!
//! Shared types for the graceful server: the lifecycle state machine's
//! vocabulary, connection identities, and the client-IP resolution helper
//! that request handlers call.
//!
//! This crate has zero dependencies on sockets, TLS, or an async runtime.
//! Everything here can be unit-tested without binding a port.
//!
//! # Architecture overview
//!
//! - **`domain`** – The lifecycle of one server instance
//!   ([`LifecycleState`]) and the identity of one tracked connection
//!   ([`ConnectionId`]).  The server crate mutates these; this crate only
//!   defines what the values mean and which transitions are legal.
//!
//! - **`client_ip`** – Best-effort client address resolution from proxy
//!   headers (`X-Real-Ip`, `X-Forwarded-For`) and the raw peer address
//!   string, with a loopback fallback for malformed input.

pub mod client_ip;
pub mod domain;

// Re-export the most-used types at the crate root so callers can write
// `graceful_core::LifecycleState` instead of the full module path.
pub use client_ip::{remote_ip, split_host_port, ClientAddrSource, HostPortError, RequestMeta};
pub use domain::connection::ConnectionId;
pub use domain::lifecycle::LifecycleState;
