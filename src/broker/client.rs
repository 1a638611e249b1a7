//! Per-client state held by the broker.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;

use super::protocol::ServerFrame;
use super::topic;
use crate::hooks::ClientInfo;

/// A connected client.
///
/// Shared between the client table and the connection task. `closed` gates
/// the terminal disconnect so it happens exactly once. The outbound queue is
/// bounded; the broker disconnects a client whose queue is full.
#[derive(Debug)]
pub struct Client {
    pub info: ClientInfo,
    subscriptions: DashMap<String, u8>,
    outbound: mpsc::Sender<ServerFrame>,
    closed: AtomicBool,
    kick: Notify,
}

impl Client {
    pub(crate) fn new(info: ClientInfo, outbound: mpsc::Sender<ServerFrame>) -> Self {
        Self {
            info,
            subscriptions: DashMap::new(),
            outbound,
            closed: AtomicBool::new(false),
            kick: Notify::new(),
        }
    }

    /// Queue a frame for the connection's writer without waiting.
    pub(crate) fn send(&self, frame: ServerFrame) -> Result<(), TrySendError<ServerFrame>> {
        self.outbound.try_send(frame)
    }

    pub(crate) fn subscribe(&self, filter: String, qos: u8) {
        self.subscriptions.insert(filter, qos);
    }

    pub(crate) fn unsubscribe(&self, filter: &str) -> bool {
        self.subscriptions.remove(filter).is_some()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Highest QoS among subscriptions matching `topic_name`.
    pub fn matching_qos(&self, topic_name: &str) -> Option<u8> {
        self.subscriptions
            .iter()
            .filter(|entry| topic::matches(entry.key(), topic_name))
            .map(|entry| *entry.value())
            .max()
    }

    /// Mark the client closed. Returns `true` only for the call that closed it.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Tell the connection task to stop.
    pub(crate) fn kick(&self) {
        self.kick.notify_one();
    }

    pub(crate) async fn kicked(&self) {
        self.kick.notified().await;
    }
}
