//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ListenerBinding (id, address, transport)
//!     → listener.rs (bind, accept loop, connection limits)
//!     → connection.rs (id + lifetime tracking for shutdown drain)
//!     → Hand off to the broker's connection task
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each connection task tracked for graceful shutdown
//! - Transports are erased behind `ConnectionStream`

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{
    Accepted, ConnectionPermit, ConnectionStream, Listener, ListenerBinding, ListenerError,
    TransportKind,
};
