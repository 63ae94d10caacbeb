//! Domain entities for the graceful server.
//!
//! This module contains pure types with no infrastructure dependencies.
//! The server crate owns the sockets, tasks, and timers; the types here
//! only describe *where* a server instance is in its life and *which*
//! connection a bookkeeping entry refers to.

/// Lifecycle states of one server instance and their ordering.
pub mod lifecycle;

/// Identity of one accepted connection.
pub mod connection;
