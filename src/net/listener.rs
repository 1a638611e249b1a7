//! Listener bindings and bound listeners with backpressure.
//!
//! # Responsibilities
//! - Describe a named endpoint (id, address, transport)
//! - Bind TCP or unix-socket listeners
//! - Enforce max_connections via semaphore
//! - Surface accept errors to the accept loop

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Transport a listener accepts connections on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    /// Unix domain socket; `address` is the socket path.
    Unix,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => f.write_str("tcp"),
            TransportKind::Unix => f.write_str("unix"),
        }
    }
}

/// A named endpoint the broker accepts connections on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerBinding {
    pub id: String,
    pub address: String,
    pub transport: TransportKind,
    /// Maximum concurrent connections on this listener.
    pub max_connections: usize,
}

impl ListenerBinding {
    pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

    /// TCP binding with the default connection limit.
    pub fn tcp(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            transport: TransportKind::Tcp,
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Unix-socket binding with the default connection limit.
    pub fn unix(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: path.into(),
            transport: TransportKind::Unix,
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }
}

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("listener '{id}' failed to bind {address}: {source}")]
    Bind {
        id: String,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("listener '{id}' failed to accept: {source}")]
    Accept {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("listener '{0}' is closed")]
    Closed(String),
}

/// Byte stream of an accepted connection, independent of transport.
pub trait ConnectionStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> ConnectionStream for T {}

/// An accepted connection and the slot it occupies.
pub struct Accepted {
    pub stream: Box<dyn ConnectionStream>,
    pub remote: String,
    pub permit: ConnectionPermit,
}

enum Inner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

/// A bound listener that limits concurrent connections.
///
/// When the limit is reached, `accept` waits until a slot is released.
pub struct Listener {
    binding: ListenerBinding,
    inner: Inner,
    connection_limit: Arc<Semaphore>,
    local_addr: String,
}

impl Listener {
    /// Bind the endpoint described by `binding`.
    pub async fn bind(binding: &ListenerBinding) -> Result<Self, ListenerError> {
        let bind_err = |source| ListenerError::Bind {
            id: binding.id.clone(),
            address: binding.address.clone(),
            source,
        };

        let (inner, local_addr) = match binding.transport {
            TransportKind::Tcp => {
                let addr: SocketAddr = binding.address.parse().map_err(|e| {
                    bind_err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
                })?;
                let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
                let local = listener.local_addr().map_err(bind_err)?;
                (Inner::Tcp(listener), local.to_string())
            }
            #[cfg(unix)]
            TransportKind::Unix => {
                // A stale socket file from a previous run blocks the bind.
                let _ = std::fs::remove_file(&binding.address);
                let listener = tokio::net::UnixListener::bind(&binding.address).map_err(bind_err)?;
                (Inner::Unix(listener), binding.address.clone())
            }
            #[cfg(not(unix))]
            TransportKind::Unix => {
                return Err(bind_err(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "unix sockets are not supported on this platform",
                )))
            }
        };

        tracing::info!(
            listener = %binding.id,
            transport = %binding.transport,
            address = %local_addr,
            max_connections = binding.max_connections,
            "Listener bound"
        );

        Ok(Self {
            binding: binding.clone(),
            inner,
            connection_limit: Arc::new(Semaphore::new(binding.max_connections)),
            local_addr,
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// The returned permit must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<Accepted, ListenerError> {
        // Acquire permit first (backpressure)
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed(self.binding.id.clone()))?;

        let accept_err = |source| ListenerError::Accept {
            id: self.binding.id.clone(),
            source,
        };

        let (stream, remote): (Box<dyn ConnectionStream>, String) = match &self.inner {
            Inner::Tcp(listener) => {
                let (stream, addr) = listener.accept().await.map_err(accept_err)?;
                let _ = stream.set_nodelay(true);
                (Box::new(stream), addr.to_string())
            }
            #[cfg(unix)]
            Inner::Unix(listener) => {
                let (stream, _) = listener.accept().await.map_err(accept_err)?;
                (Box::new(stream), format!("unix:{}", self.local_addr))
            }
        };

        tracing::debug!(
            listener = %self.binding.id,
            peer_addr = %remote,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok(Accepted {
            stream,
            remote,
            permit: ConnectionPermit { _permit: permit },
        })
    }

    pub fn id(&self) -> &str {
        &self.binding.id
    }

    pub fn binding(&self) -> &ListenerBinding {
        &self.binding
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    /// Current free connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        #[cfg(unix)]
        let is_unix = matches!(self.inner, Inner::Unix(_));
        #[cfg(not(unix))]
        let is_unix = false;
        if is_unix {
            let _ = std::fs::remove_file(&self.binding.address);
        }
        tracing::debug!(listener = %self.binding.id, "Listener closed");
    }
}

/// A connection slot; released back to the listener on drop.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn binds_ephemeral_tcp_port() {
        let listener = Listener::bind(&ListenerBinding::tcp("t1", "127.0.0.1:0"))
            .await
            .unwrap();
        assert_eq!(listener.id(), "t1");
        assert!(!listener.local_addr().ends_with(":0"));
    }

    #[tokio::test]
    async fn invalid_address_is_bind_error() {
        let err = Listener::bind(&ListenerBinding::tcp("bad", "nowhere"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ListenerError::Bind { ref id, .. } if id == "bad"));
    }

    #[tokio::test]
    async fn permits_limit_concurrent_connections() {
        let binding = ListenerBinding::tcp("t1", "127.0.0.1:0").with_max_connections(1);
        let listener = Listener::bind(&binding).await.unwrap();
        let addr = listener.local_addr().to_string();

        let _c1 = tokio::net::TcpStream::connect(&addr).await.unwrap();
        let first = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 0);

        let _c2 = tokio::net::TcpStream::connect(&addr).await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), listener.accept()).await;
        assert!(blocked.is_err());

        drop(first);
        let second = tokio::time::timeout(Duration::from_secs(1), listener.accept()).await;
        assert!(second.unwrap().is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_socket_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.sock");
        let binding = ListenerBinding::unix("u1", path.to_string_lossy().to_string());

        let listener = Listener::bind(&binding).await.unwrap();
        assert!(path.exists());
        drop(listener);
        assert!(!path.exists());
    }
}
