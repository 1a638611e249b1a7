//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Listener ids unique and non-empty, TCP addresses parseable
//! - Value ranges (limits > 0, grace period > 0 when set)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::BrokerConfig;
use crate::net::TransportKind;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no listeners configured")]
    NoListeners,

    #[error("listener #{0} has an empty id")]
    EmptyListenerId(usize),

    #[error("listener id '{0}' is used more than once")]
    DuplicateListenerId(String),

    #[error("listener '{id}' has invalid address '{address}'")]
    InvalidAddress { id: String, address: String },

    #[error("listener '{0}' allows zero connections")]
    ZeroMaxConnections(String),

    #[error("limits.connect_timeout_secs must be greater than zero")]
    ZeroConnectTimeout,

    #[error("limits.max_frame_bytes must be greater than zero")]
    ZeroFrameSize,

    #[error("limits.outbound_queue must be greater than zero")]
    ZeroOutboundQueue,

    #[error("shutdown.grace_period_secs must be greater than zero; omit it to wait indefinitely")]
    ZeroGracePeriod,

    #[error("observability.metrics_address '{0}' is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Check `config`, collecting every error.
pub fn validate_config(config: &BrokerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listeners.is_empty() {
        errors.push(ValidationError::NoListeners);
    }

    let mut seen = HashSet::new();
    for (i, listener) in config.listeners.iter().enumerate() {
        if listener.id.trim().is_empty() {
            errors.push(ValidationError::EmptyListenerId(i));
        } else if !seen.insert(listener.id.as_str()) {
            errors.push(ValidationError::DuplicateListenerId(listener.id.clone()));
        }

        let address_ok = match listener.transport {
            TransportKind::Tcp => listener.address.parse::<SocketAddr>().is_ok(),
            TransportKind::Unix => !listener.address.trim().is_empty(),
        };
        if !address_ok {
            errors.push(ValidationError::InvalidAddress {
                id: listener.id.clone(),
                address: listener.address.clone(),
            });
        }

        if listener.max_connections == 0 {
            errors.push(ValidationError::ZeroMaxConnections(listener.id.clone()));
        }
    }

    if config.limits.connect_timeout_secs == 0 {
        errors.push(ValidationError::ZeroConnectTimeout);
    }
    if config.limits.max_frame_bytes == 0 {
        errors.push(ValidationError::ZeroFrameSize);
    }
    if config.limits.outbound_queue == 0 {
        errors.push(ValidationError::ZeroOutboundQueue);
    }
    if config.shutdown.grace_period_secs == Some(0) {
        errors.push(ValidationError::ZeroGracePeriod);
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ListenerConfig;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&BrokerConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = BrokerConfig::default();
        config.listeners.push(ListenerConfig {
            address: "not-an-address".into(),
            max_connections: 0,
            ..ListenerConfig::default()
        });
        config.limits.connect_timeout_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::DuplicateListenerId("t1".into()),
                ValidationError::InvalidAddress {
                    id: "t1".into(),
                    address: "not-an-address".into()
                },
                ValidationError::ZeroMaxConnections("t1".into()),
                ValidationError::ZeroConnectTimeout,
            ]
        );
    }

    #[test]
    fn unix_listener_accepts_paths() {
        let mut config = BrokerConfig::default();
        config.listeners = vec![ListenerConfig {
            id: "sock".into(),
            address: "/tmp/broker.sock".into(),
            transport: TransportKind::Unix,
            max_connections: 10,
        }];
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn empty_listener_list_is_rejected() {
        let mut config = BrokerConfig::default();
        config.listeners.clear();
        assert_eq!(
            validate_config(&config).unwrap_err(),
            vec![ValidationError::NoListeners]
        );
    }

    #[test]
    fn zero_grace_period_and_queue_are_rejected() {
        let mut config = BrokerConfig::default();
        config.shutdown.grace_period_secs = Some(0);
        config.limits.outbound_queue = 0;
        assert_eq!(
            validate_config(&config).unwrap_err(),
            vec![
                ValidationError::ZeroOutboundQueue,
                ValidationError::ZeroGracePeriod,
            ]
        );

        config.shutdown.grace_period_secs = Some(1);
        config.limits.outbound_queue = 1;
        assert!(validate_config(&config).is_ok());
    }
}
