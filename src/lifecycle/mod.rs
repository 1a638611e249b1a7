//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (orchestrator.rs):
//!     Register hooks → Register listeners → serve → all listeners bound → Serving
//!
//! Shutdown (shutdown.rs):
//!     close() → trigger → accept loops and sessions stop → drain → Stopped
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Orchestrator moves to ShuttingDown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: hooks first, then listeners, then serving
//! - Ordered shutdown: stop accept, disconnect clients, drain, stop hooks
//! - Drain wait is bounded only when a grace period is configured

pub mod orchestrator;
pub mod shutdown;
pub mod signals;

pub use orchestrator::{LifecycleError, LifecycleState, Orchestrator, Running};
pub use shutdown::{Shutdown, ShutdownListener};
pub use signals::{ShutdownSignal, Signals};
