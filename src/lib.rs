//! Embeddable publish/subscribe broker with a hook pipeline.

pub mod broker;
pub mod config;
pub mod hooks;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use broker::{Broker, BrokerError, BrokerState};
pub use config::schema::BrokerConfig;
pub use hooks::{Hook, HookOptions, HookRegistry};
pub use lifecycle::{LifecycleError, LifecycleState, Orchestrator, ShutdownSignal};
