//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the broker.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::net::{ListenerBinding, TransportKind};

/// Root configuration for the broker.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Listener definitions; each id must be unique.
    pub listeners: Vec<ListenerConfig>,

    /// Built-in hooks to register.
    pub hooks: HooksConfig,

    /// Shutdown behaviour.
    pub shutdown: ShutdownConfig,

    /// Per-connection protocol limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listeners: vec![ListenerConfig::default()],
            hooks: HooksConfig::default(),
            shutdown: ShutdownConfig::default(),
            limits: LimitsConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// A single listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Listener identifier, unique within the broker.
    pub id: String,

    /// Bind address ("0.0.0.0:1883", or a socket path for unix).
    pub address: String,

    /// Transport kind.
    pub transport: TransportKind,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            id: "t1".to_string(),
            address: "0.0.0.0:1883".to_string(),
            transport: TransportKind::Tcp,
            max_connections: 10_000,
        }
    }
}

impl ListenerConfig {
    pub fn binding(&self) -> ListenerBinding {
        ListenerBinding {
            id: self.id.clone(),
            address: self.address.clone(),
            transport: self.transport,
            max_connections: self.max_connections,
        }
    }
}

/// Which authorization policy hook to register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    #[default]
    AllowAll,
    DenyAll,
}

/// Built-in hook selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HooksConfig {
    pub policy: PolicyKind,
    pub audit: AuditConfig,
    /// Register the statistics hook.
    pub stats: bool,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::AllowAll,
            audit: AuditConfig::default(),
            stats: true,
        }
    }
}

/// Audit hook settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,

    /// Include message payloads in publish records.
    pub show_payload: bool,

    /// Payload bytes shown before truncation.
    pub max_payload_bytes: usize,

    pub sink: AuditSinkConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            show_payload: true,
            max_payload_bytes: 256,
            sink: AuditSinkConfig::Log,
        }
    }
}

/// Where audit lines go.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AuditSinkConfig {
    /// The tracing subscriber (target `audit`).
    #[default]
    Log,
    Stdout,
    File { path: String },
}

/// Shutdown settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Upper bound on connection drain; `None` waits indefinitely. Must be
    /// non-zero when set.
    pub grace_period_secs: Option<u64>,
}

/// Per-connection limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Seconds a new connection has to send its `connect` frame.
    pub connect_timeout_secs: u64,

    /// Longest accepted frame line in bytes.
    pub max_frame_bytes: usize,

    /// Frames queued per client before it is disconnected as a slow consumer.
    pub outbound_queue: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            max_frame_bytes: 256 * 1024,
            outbound_queue: 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub log_filter: String,

    /// Emit JSON log lines.
    pub json_logs: bool,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Metrics listen address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "hookbroker=info,audit=info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
