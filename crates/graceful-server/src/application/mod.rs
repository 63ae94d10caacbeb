//! Application layer: the handler contract and the shutdown state machine.
//!
//! Nothing here binds sockets.  The infrastructure layer drives these types
//! from the accept loop.

pub mod coordinator;
pub mod fixed_response;
pub mod handler;

pub use coordinator::{ShutdownCoordinator, StopOutcome};
pub use fixed_response::FixedResponse;
pub use handler::{handler_fn, Connection, Handler, HandlerFn, Stream};
