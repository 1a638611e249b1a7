//! Broker statistics hook.
//!
//! Keeps its own atomic counters (readable through [`StatsHook::snapshot`])
//! and mirrors them into the `metrics` facade so a Prometheus exporter, when
//! installed, can scrape them.
//!
//! Granted filters are tracked per connection, so the subscription count
//! follows re-subscribes, unknown unsubscribes and disconnects exactly.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use super::event::{ClientInfo, ConnectRequest, DisconnectReason, EventKind, KindSet, Message, Subscription};
use super::Hook;
use crate::net::ConnectionId;
use crate::observability::metrics;

const STATS_KINDS: KindSet = KindSet::of(&[
    EventKind::Started,
    EventKind::Connect,
    EventKind::Disconnect,
    EventKind::Subscribed,
    EventKind::Unsubscribed,
    EventKind::Published,
]);

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub connections: u64,
    pub disconnects: u64,
    pub active_clients: u64,
    pub subscriptions: u64,
    pub messages_published: u64,
    pub bytes_published: u64,
    pub started_at_unix: u64,
}

#[derive(Debug, Default)]
pub struct StatsHook {
    connections: AtomicU64,
    disconnects: AtomicU64,
    subscriptions: AtomicU64,
    messages_published: AtomicU64,
    bytes_published: AtomicU64,
    started_at_unix: AtomicU64,
    filters: DashMap<ConnectionId, HashSet<String>>,
}

impl StatsHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let connections = self.connections.load(Ordering::Relaxed);
        let disconnects = self.disconnects.load(Ordering::Relaxed);
        StatsSnapshot {
            connections,
            disconnects,
            active_clients: connections.saturating_sub(disconnects),
            subscriptions: self.subscriptions.load(Ordering::Relaxed),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            bytes_published: self.bytes_published.load(Ordering::Relaxed),
            started_at_unix: self.started_at_unix.load(Ordering::Relaxed),
        }
    }

    fn add_subscriptions(&self, added: u64) {
        if added == 0 {
            return;
        }
        self.subscriptions.fetch_add(added, Ordering::Relaxed);
        metrics::record_subscriptions(added as i64);
    }

    fn remove_subscriptions(&self, removed: u64) {
        if removed == 0 {
            return;
        }
        let _ = self
            .subscriptions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(removed)));
        metrics::record_subscriptions(-(removed as i64));
    }
}

impl Hook for StatsHook {
    fn id(&self) -> &str {
        "stats"
    }

    fn provides(&self) -> KindSet {
        STATS_KINDS
    }

    fn on_started(&self) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.started_at_unix.store(now, Ordering::Relaxed);
    }

    fn on_connect(&self, client: &ClientInfo, _connect: &ConnectRequest) {
        self.connections.fetch_add(1, Ordering::Relaxed);
        metrics::record_connect(&client.listener);
    }

    fn on_disconnect(&self, client: &ClientInfo, _reason: &DisconnectReason, expire: bool) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
        metrics::record_disconnect(&client.listener, expire);
        if let Some((_, remaining)) = self.filters.remove(&client.connection) {
            self.remove_subscriptions(remaining.len() as u64);
        }
    }

    fn on_subscribed(&self, client: &ClientInfo, subscriptions: &[Subscription], reason_codes: &[u8]) {
        let mut filters = self.filters.entry(client.connection).or_default();
        let mut added = 0;
        for (i, sub) in subscriptions.iter().enumerate() {
            let granted = reason_codes.get(i).map_or(true, |code| *code < 0x80);
            if granted && filters.insert(sub.filter.clone()) {
                added += 1;
            }
        }
        drop(filters);
        self.add_subscriptions(added);
    }

    fn on_unsubscribed(&self, client: &ClientInfo, filters: &[String]) {
        let mut removed = 0;
        if let Some(mut current) = self.filters.get_mut(&client.connection) {
            for filter in filters {
                if current.remove(filter.as_str()) {
                    removed += 1;
                }
            }
        }
        self.remove_subscriptions(removed);
    }

    fn on_published(&self, _client: &ClientInfo, message: &Message) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
        self.bytes_published
            .fetch_add(message.payload.len() as u64, Ordering::Relaxed);
        metrics::record_published(message.payload.len());
    }
}
