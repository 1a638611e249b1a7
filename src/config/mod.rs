//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → BrokerConfig (validated, immutable)
//!     → Orchestrator builds broker, hooks and listeners from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; no hot reload
//! - All fields have defaults; an absent file means listener `t1` on :1883
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AuditConfig, AuditSinkConfig, BrokerConfig, HooksConfig, LimitsConfig, ListenerConfig,
    ObservabilityConfig, PolicyKind, ShutdownConfig,
};
pub use validation::{validate_config, ValidationError};
