//! Event hook subsystem.
//!
//! # Data Flow
//! ```text
//! Broker core (connection task)
//!     → builds an Event (kind + borrowed payload)
//!     → registry.rs (walk hooks in registration order)
//!         → hook.provides().contains(kind)?
//!         → typed callback (on_connect, on_published, ...)
//!     → veto kinds: first Err(Veto) stops the walk → Rejection
//!     → notification kinds: every capable hook runs → Ok
//!
//! Built-in hooks:
//!     policy.rs (allow-all / deny-all authorization)
//!     audit.rs  (one text line per event to a sink)
//!     stats.rs  (atomic counters + metrics)
//! ```
//!
//! # Design Decisions
//! - Capabilities are a static `KindSet`, checked by membership
//! - Every callback has a no-op default; hooks override what they provide
//! - Notification callbacks return `()` so they cannot fail the dispatch path
//! - Dispatch is synchronous; one event never runs hooks concurrently

pub mod audit;
pub mod event;
pub mod policy;
pub mod registry;
pub mod stats;

pub use audit::{AuditConfig, AuditHook, AuditSink, LogSink, WriterSink};
pub use event::{
    Access, ClientInfo, ConnectRequest, DisconnectReason, Event, EventKind, KindSet, Message,
    Subscription,
};
pub use policy::{AllowHook, DenyHook};
pub use registry::{HookRegistry, Rejection, RegistryError};
pub use stats::{StatsHook, StatsSnapshot};

use thiserror::Error;

/// A veto returned by a gatekeeping callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct Veto {
    pub reason: String,
}

impl Veto {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Failure of a hook's own lifecycle (`init` / `stop`).
#[derive(Debug, Error)]
pub enum HookError {
    #[error("invalid hook options: {0}")]
    Options(String),

    #[error("hook io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Free-form settings handed to a hook at registration.
#[derive(Debug, Clone, Default)]
pub struct HookOptions {
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl HookOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a setting.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.settings.get(key)
    }
}

/// A pluggable observer / decision unit invoked by the broker core.
///
/// Implementors declare the kinds they handle via [`Hook::provides`] and
/// override the matching callbacks. Callbacks for kinds a hook does not
/// provide are never invoked. Hooks may be called from many connection tasks
/// at once, so mutable state must be synchronized by the hook itself.
pub trait Hook: Send + Sync + 'static {
    /// Unique identity within a registry.
    fn id(&self) -> &str;

    /// Event kinds this hook handles.
    fn provides(&self) -> KindSet;

    /// Called once when the hook is registered.
    fn init(&self, _options: &HookOptions) -> Result<(), HookError> {
        Ok(())
    }

    /// Called once at the end of broker shutdown.
    fn stop(&self) -> Result<(), HookError> {
        Ok(())
    }

    fn on_started(&self) {}

    fn on_stopped(&self) {}

    /// Decide whether a client may connect.
    fn on_connect_authenticate(
        &self,
        _client: &ClientInfo,
        _connect: &ConnectRequest,
    ) -> Result<(), Veto> {
        Ok(())
    }

    /// Decide whether a client may read or write a topic.
    fn on_acl_check(&self, _client: &ClientInfo, _topic: &str, _access: Access) -> Result<(), Veto> {
        Ok(())
    }

    fn on_connect(&self, _client: &ClientInfo, _connect: &ConnectRequest) {}

    /// `expire` is true when the client closed gracefully.
    fn on_disconnect(&self, _client: &ClientInfo, _reason: &DisconnectReason, _expire: bool) {}

    fn on_subscribed(
        &self,
        _client: &ClientInfo,
        _subscriptions: &[Subscription],
        _reason_codes: &[u8],
    ) {
    }

    fn on_unsubscribed(&self, _client: &ClientInfo, _filters: &[String]) {}

    /// Decide whether an inbound message may be routed.
    fn on_publish(&self, _client: &ClientInfo, _message: &Message) -> Result<(), Veto> {
        Ok(())
    }

    fn on_published(&self, _client: &ClientInfo, _message: &Message) {}
}
