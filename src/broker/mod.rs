//! Broker core subsystem.
//!
//! # Data Flow
//! ```text
//! Broker::serve
//!     → net::Listener::bind (every registered binding; any failure is fatal)
//!     → Started event
//!     → accept loop per listener
//!         → session.rs (handshake, frame loop)
//!             → server.rs attach/handle/disconnect
//!                 → hooks::HookRegistry::dispatch
//!                 → route (linear filter match over client subscriptions)
//!
//! Broker::close
//!     → stop accept loops → Disconnect per client → drain → Stopped → hook stop
//! ```
//!
//! # Design Decisions
//! - A small stand-in for a full protocol engine: JSON-line frames, no
//!   persistence, no retained messages, no topic trie
//! - Registration needs `&mut Broker`; serving needs `Arc<Broker>`, so the
//!   hook list cannot change while serving
//! - Each client's terminal disconnect is gated by an atomic flag

pub mod client;
pub mod protocol;
mod server;
mod session;
pub mod topic;

pub use client::Client;
pub use protocol::{ClientFrame, ProtocolError, ServerFrame};
pub use server::{Broker, BrokerError, BrokerState, ShutdownError};
