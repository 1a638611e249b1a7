//! Event kinds and the payloads carried with them.
//!
//! # Responsibilities
//! - Enumerate every lifecycle moment the broker core emits
//! - Describe the capability set a hook declares (`KindSet`)
//! - Carry borrowed, immutable payloads through dispatch (`Event`)

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::net::ConnectionId;

/// A lifecycle moment the broker core can emit.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// All listeners are bound and accepting.
    Started = 0,
    /// Shutdown finished; no more events follow.
    Stopped = 1,
    /// A client asks to connect. Veto-capable.
    ConnectAuthenticate = 2,
    /// A client asks to read or write a topic. Veto-capable.
    AclCheck = 3,
    /// A client connection was accepted.
    Connect = 4,
    /// A client connection ended.
    Disconnect = 5,
    /// A subscribe request was processed.
    Subscribed = 6,
    /// An unsubscribe request was processed.
    Unsubscribed = 7,
    /// An inbound message is about to be routed. Veto-capable.
    Publish = 8,
    /// An inbound message was routed to subscribers.
    Published = 9,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 10] = [
        EventKind::Started,
        EventKind::Stopped,
        EventKind::ConnectAuthenticate,
        EventKind::AclCheck,
        EventKind::Connect,
        EventKind::Disconnect,
        EventKind::Subscribed,
        EventKind::Unsubscribed,
        EventKind::Publish,
        EventKind::Published,
    ];

    /// Whether a hook failure for this kind rejects the triggering action.
    pub const fn is_veto(self) -> bool {
        matches!(
            self,
            EventKind::ConnectAuthenticate | EventKind::AclCheck | EventKind::Publish
        )
    }

    /// Stable lowercase name used in log fields.
    pub const fn as_str(self) -> &'static str {
        match self {
            EventKind::Started => "started",
            EventKind::Stopped => "stopped",
            EventKind::ConnectAuthenticate => "connect_authenticate",
            EventKind::AclCheck => "acl_check",
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::Subscribed => "subscribed",
            EventKind::Unsubscribed => "unsubscribed",
            EventKind::Publish => "publish",
            EventKind::Published => "published",
        }
    }

    const fn bit(self) -> u32 {
        1 << (self as u8)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static set of event kinds a hook handles.
///
/// Built in `const` context so each hook type can declare its capabilities
/// once:
///
/// ```
/// use hookbroker::hooks::{EventKind, KindSet};
///
/// const KINDS: KindSet = KindSet::of(&[EventKind::Connect, EventKind::Disconnect]);
/// assert!(KINDS.contains(EventKind::Connect));
/// assert!(!KINDS.contains(EventKind::Publish));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KindSet(u32);

impl KindSet {
    /// The empty set.
    pub const EMPTY: KindSet = KindSet(0);

    /// Build a set from a list of kinds.
    pub const fn of(kinds: &[EventKind]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < kinds.len() {
            bits |= kinds[i].bit();
            i += 1;
        }
        KindSet(bits)
    }

    /// Membership test.
    pub const fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Union of two sets.
    pub const fn with(self, other: KindSet) -> Self {
        KindSet(self.0 | other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate the contained kinds in declaration order.
    pub fn iter(self) -> impl Iterator<Item = EventKind> {
        EventKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

/// Identity and origin of a connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client identifier (assigned by the broker when the client sent none).
    pub id: String,
    /// Remote endpoint as reported by the transport.
    pub remote: String,
    /// Id of the listener the client arrived on.
    pub listener: String,
    /// Connection this client is bound to.
    pub connection: ConnectionId,
    /// Username presented on connect, if any.
    pub username: Option<String>,
}

/// The connect request as presented by the client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectRequest {
    pub client_id: String,
    pub username: Option<String>,
    pub clean: bool,
}

/// A single topic filter with its granted (or requested) QoS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub filter: String,
    pub qos: u8,
}

/// An application message flowing through the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

/// Direction of an ACL check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Subscribe to / receive from a topic.
    Read,
    /// Publish to a topic.
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => f.write_str("read"),
            Access::Write => f.write_str("write"),
        }
    }
}

/// Why a client connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client sent a `disconnect` frame.
    ClientDisconnect,
    /// The transport closed without a `disconnect` frame.
    ConnectionLost,
    /// The client violated the frame protocol.
    ProtocolError(String),
    /// Another connection took over this client id.
    SessionTakenOver,
    /// The client's outbound queue filled up.
    SlowConsumer,
    /// The broker is shutting down.
    ServerShutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ClientDisconnect => f.write_str("client disconnect"),
            DisconnectReason::ConnectionLost => f.write_str("connection lost"),
            DisconnectReason::ProtocolError(e) => write!(f, "protocol error: {}", e),
            DisconnectReason::SessionTakenOver => f.write_str("session taken over"),
            DisconnectReason::SlowConsumer => f.write_str("slow consumer"),
            DisconnectReason::ServerShutdown => f.write_str("server shutdown"),
        }
    }
}

/// An event with its payload, as handed to the registry.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    Started,
    Stopped,
    ConnectAuthenticate {
        client: &'a ClientInfo,
        connect: &'a ConnectRequest,
    },
    AclCheck {
        client: &'a ClientInfo,
        topic: &'a str,
        access: Access,
    },
    Connect {
        client: &'a ClientInfo,
        connect: &'a ConnectRequest,
    },
    Disconnect {
        client: &'a ClientInfo,
        reason: &'a DisconnectReason,
        /// `true` when the client closed gracefully.
        expire: bool,
    },
    Subscribed {
        client: &'a ClientInfo,
        subscriptions: &'a [Subscription],
        reason_codes: &'a [u8],
    },
    Unsubscribed {
        client: &'a ClientInfo,
        filters: &'a [String],
    },
    Publish {
        client: &'a ClientInfo,
        message: &'a Message,
    },
    Published {
        client: &'a ClientInfo,
        message: &'a Message,
    },
}

impl Event<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Started => EventKind::Started,
            Event::Stopped => EventKind::Stopped,
            Event::ConnectAuthenticate { .. } => EventKind::ConnectAuthenticate,
            Event::AclCheck { .. } => EventKind::AclCheck,
            Event::Connect { .. } => EventKind::Connect,
            Event::Disconnect { .. } => EventKind::Disconnect,
            Event::Subscribed { .. } => EventKind::Subscribed,
            Event::Unsubscribed { .. } => EventKind::Unsubscribed,
            Event::Publish { .. } => EventKind::Publish,
            Event::Published { .. } => EventKind::Published,
        }
    }

    /// The client the event concerns, if any.
    pub fn client(&self) -> Option<&ClientInfo> {
        match self {
            Event::Started | Event::Stopped => None,
            Event::ConnectAuthenticate { client, .. }
            | Event::AclCheck { client, .. }
            | Event::Connect { client, .. }
            | Event::Disconnect { client, .. }
            | Event::Subscribed { client, .. }
            | Event::Unsubscribed { client, .. }
            | Event::Publish { client, .. }
            | Event::Published { client, .. } => Some(client),
        }
    }
}
