//! The broker core: hook/listener registration, serve loop, close.
//!
//! # Responsibilities
//! - Own the hook registry and listener bindings registered before serving
//! - Bind every listener and run one accept loop per listener
//! - Keep the client table and route messages between clients
//! - Invoke hooks at each lifecycle point
//! - Close: stop accepting, emit terminal disconnects, drain, stop hooks

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::client::Client;
use super::protocol::{ClientFrame, ServerFrame, MAX_QOS, SUBSCRIBE_REFUSED};
use super::session;
use super::topic;
use crate::config::BrokerConfig;
use crate::hooks::{
    Access, ClientInfo, ConnectRequest, DisconnectReason, Event, EventKind, Hook, HookOptions,
    HookRegistry, Message, Rejection, RegistryError, Subscription,
};
use crate::lifecycle::shutdown::{Shutdown, ShutdownListener};
use crate::net::{ConnectionId, ConnectionTracker, Listener, ListenerBinding, ListenerError};

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Id reported in rejections the broker makes itself.
const BROKER_REJECTOR: &str = "broker";

/// Serving state of a broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    /// Accepting registrations, not yet serving.
    Idle,
    /// Binding listeners.
    Starting,
    Serving,
    Closing,
    Closed,
}

/// Errors raised by registration and serving.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Hook(#[from] RegistryError),

    #[error("listener '{0}' is already registered")]
    DuplicateListener(String),

    #[error("no listeners registered")]
    NoListeners,

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("broker is already serving")]
    AlreadyServing,

    #[error("broker is closed")]
    Closed,
}

/// Errors raised while closing.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("{remaining} connection(s) still open after the {grace_secs}s grace period")]
    DrainTimeout { remaining: u64, grace_secs: u64 },
}

/// The broker core.
///
/// Hooks and listeners are registered through `&mut self` before the broker
/// is shared; `serve` and `close` operate on the shared `Arc<Broker>`.
pub struct Broker {
    config: BrokerConfig,
    hooks: HookRegistry,
    listeners: Vec<ListenerBinding>,
    bound: DashMap<String, String>,
    clients: DashMap<String, Arc<Client>>,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
    state: watch::Sender<BrokerState>,
    closing: AtomicBool,
}

impl Broker {
    /// Create a broker. Listeners and hooks are added separately.
    pub fn new(config: BrokerConfig) -> Self {
        let (state, _) = watch::channel(BrokerState::Idle);
        Self {
            config,
            hooks: HookRegistry::new(),
            listeners: Vec::new(),
            bound: DashMap::new(),
            clients: DashMap::new(),
            tracker: ConnectionTracker::new(),
            shutdown: Shutdown::new(),
            state,
            closing: AtomicBool::new(false),
        }
    }

    /// Register a hook. Dispatch order follows registration order.
    pub fn add_hook(&mut self, hook: Arc<dyn Hook>, options: HookOptions) -> Result<(), BrokerError> {
        self.hooks.add(hook, &options)?;
        Ok(())
    }

    /// Register a listener binding. Ids must be unique.
    pub fn add_listener(&mut self, binding: ListenerBinding) -> Result<(), BrokerError> {
        if self.listeners.iter().any(|l| l.id == binding.id) {
            return Err(BrokerError::DuplicateListener(binding.id));
        }
        tracing::debug!(
            listener = %binding.id,
            address = %binding.address,
            transport = %binding.transport,
            "Listener registered"
        );
        self.listeners.push(binding);
        Ok(())
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn listeners(&self) -> &[ListenerBinding] {
        &self.listeners
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn state(&self) -> BrokerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<BrokerState> {
        self.state.subscribe()
    }

    /// Address a listener is bound to, once serving.
    pub fn listener_addr(&self, id: &str) -> Option<String> {
        self.bound.get(id).map(|addr| addr.value().clone())
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client(&self, id: &str) -> Option<Arc<Client>> {
        self.clients.get(id).map(|c| c.value().clone())
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub(crate) fn shutdown_listener(&self) -> ShutdownListener {
        self.shutdown.subscribe()
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.config.limits.connect_timeout_secs)
    }

    pub(crate) fn max_frame_bytes(&self) -> usize {
        self.config.limits.max_frame_bytes
    }

    pub(crate) fn outbound_queue(&self) -> usize {
        self.config.limits.outbound_queue.max(1)
    }

    /// Bind every listener and accept connections until closed.
    ///
    /// Fails without accepting anything if any listener cannot be bound.
    pub async fn serve(self: Arc<Self>) -> Result<(), BrokerError> {
        let mut claimed = Ok(());
        self.state.send_if_modified(|state| match *state {
            BrokerState::Idle => {
                *state = BrokerState::Starting;
                true
            }
            BrokerState::Starting | BrokerState::Serving => {
                claimed = Err(BrokerError::AlreadyServing);
                false
            }
            BrokerState::Closing | BrokerState::Closed => {
                claimed = Err(BrokerError::Closed);
                false
            }
        });
        claimed?;

        if self.listeners.is_empty() {
            self.state.send_replace(BrokerState::Closed);
            return Err(BrokerError::NoListeners);
        }

        let mut bound = Vec::with_capacity(self.listeners.len());
        for binding in &self.listeners {
            match Listener::bind(binding).await {
                Ok(listener) => {
                    self.bound
                        .insert(binding.id.clone(), listener.local_addr().to_string());
                    bound.push(listener);
                }
                Err(e) => {
                    tracing::error!(listener = %binding.id, error = %e, "Listener bind failed");
                    drop(bound);
                    self.bound.clear();
                    self.state.send_replace(BrokerState::Closed);
                    return Err(e.into());
                }
            }
        }

        let mut accept_loops = JoinSet::new();
        for listener in bound {
            let broker = Arc::clone(&self);
            let shutdown = self.shutdown.subscribe();
            accept_loops.spawn(broker.accept_loop(listener, shutdown));
        }

        self.hooks.dispatch(&Event::Started).ok();
        let serving = self.state.send_if_modified(|state| {
            if *state == BrokerState::Starting {
                *state = BrokerState::Serving;
                true
            } else {
                false
            }
        });
        if serving {
            tracing::info!(listeners = self.listeners.len(), "Broker serving");
        }

        while let Some(joined) = accept_loops.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Accept loop terminated abnormally");
            }
        }
        tracing::debug!("Serve loop finished");
        Ok(())
    }

    async fn accept_loop(self: Arc<Self>, listener: Listener, mut shutdown: ShutdownListener) {
        loop {
            tokio::select! {
                _ = shutdown.triggered() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => {
                        let guard = self.tracker.track();
                        let broker = Arc::clone(&self);
                        let listener_id = listener.id().to_string();
                        tokio::spawn(session::run(broker, listener_id, accepted, guard));
                    }
                    Err(e) => {
                        tracing::warn!(listener = %listener.id(), error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }
        tracing::info!(listener = %listener.id(), "Listener stopped accepting");
    }

    /// Authenticate a connect request and register the client.
    ///
    /// Returns `None` when the connection was rejected; the rejection has
    /// already been sent on `outbound`.
    pub(crate) fn attach(
        &self,
        connect: ConnectRequest,
        remote: String,
        listener: String,
        connection: ConnectionId,
        outbound: mpsc::Sender<ServerFrame>,
    ) -> Option<Arc<Client>> {
        let id = if connect.client_id.is_empty() {
            format!("auto-{}", Uuid::new_v4())
        } else {
            connect.client_id.clone()
        };
        let info = ClientInfo {
            id,
            remote,
            listener,
            connection,
            username: connect.username.clone(),
        };

        if let Err(rejection) = self.authenticate(&info, &connect) {
            tracing::warn!(
                client_id = %info.id,
                remote = %info.remote,
                hook = %rejection.hook,
                reason = %rejection.reason,
                "Connection rejected"
            );
            let _ = outbound.try_send(ServerFrame::Connack {
                accepted: false,
                client_id: info.id,
                reason: Some(rejection.reason),
            });
            return None;
        }

        let client = Arc::new(Client::new(info, outbound));
        if let Some(previous) = self.clients.insert(client.info.id.clone(), Arc::clone(&client)) {
            tracing::info!(
                client_id = %client.info.id,
                previous = %previous.info.remote,
                "Session taken over"
            );
            self.disconnect(&previous, DisconnectReason::SessionTakenOver, false);
        }

        self.hooks
            .dispatch(&Event::Connect {
                client: &client.info,
                connect: &connect,
            })
            .ok();
        self.send(
            &client,
            ServerFrame::Connack {
                accepted: true,
                client_id: client.info.id.clone(),
                reason: None,
            },
        );
        tracing::info!(
            client_id = %client.info.id,
            remote = %client.info.remote,
            listener = %client.info.listener,
            "Client connected"
        );

        // close() may have swept the table before this client was inserted.
        if self.is_closing() {
            self.disconnect(&client, DisconnectReason::ServerShutdown, false);
        }
        Some(client)
    }

    fn authenticate(&self, client: &ClientInfo, connect: &ConnectRequest) -> Result<(), Rejection> {
        if !self.hooks.provides(EventKind::ConnectAuthenticate) {
            return Err(Rejection {
                hook: BROKER_REJECTOR.to_string(),
                kind: EventKind::ConnectAuthenticate,
                reason: "no authentication hook registered".to_string(),
            });
        }
        self.hooks
            .dispatch(&Event::ConnectAuthenticate { client, connect })
    }

    fn check_acl(&self, client: &ClientInfo, topic: &str, access: Access) -> Result<(), Rejection> {
        if !self.hooks.provides(EventKind::AclCheck) {
            return Err(Rejection {
                hook: BROKER_REJECTOR.to_string(),
                kind: EventKind::AclCheck,
                reason: "no ACL hook registered".to_string(),
            });
        }
        self.hooks.dispatch(&Event::AclCheck {
            client,
            topic,
            access,
        })
    }

    /// End a client's connection: emit the terminal event, then release it.
    ///
    /// Only the first call for a given client has any effect.
    pub(crate) fn disconnect(&self, client: &Arc<Client>, reason: DisconnectReason, expire: bool) {
        if !client.mark_closed() {
            return;
        }
        self.clients
            .remove_if(&client.info.id, |_, current| {
                current.info.connection == client.info.connection
            });

        self.hooks
            .dispatch(&Event::Disconnect {
                client: &client.info,
                reason: &reason,
                expire,
            })
            .ok();
        tracing::info!(
            client_id = %client.info.id,
            remote = %client.info.remote,
            reason = %reason,
            expire,
            "Client disconnected"
        );
        client.kick();
    }

    /// Handle a frame from a connected client (everything except
    /// `connect` and `disconnect`, which the session owns).
    pub(crate) fn handle(&self, client: &Arc<Client>, frame: ClientFrame) {
        match frame {
            ClientFrame::Subscribe { filters } => self.subscribe(client, filters),
            ClientFrame::Unsubscribe { filters } => self.unsubscribe(client, filters),
            ClientFrame::Publish {
                topic,
                payload,
                qos,
                retain,
            } => self.publish(
                client,
                Message {
                    topic,
                    payload: payload.into_bytes(),
                    qos: qos.min(MAX_QOS),
                    retain,
                },
            ),
            ClientFrame::Ping => {
                self.send(client, ServerFrame::Pong);
            }
            ClientFrame::Connect { .. } | ClientFrame::Disconnect => {
                tracing::debug!(client_id = %client.info.id, "Session frame reached handler");
            }
        }
    }

    fn subscribe(&self, client: &Arc<Client>, filters: Vec<Subscription>) {
        let reason_codes: Vec<u8> = filters
            .iter()
            .map(|sub| {
                if !topic::valid_filter(&sub.filter) {
                    return SUBSCRIBE_REFUSED;
                }
                if let Err(rejection) = self.check_acl(&client.info, &sub.filter, Access::Read) {
                    tracing::debug!(
                        client_id = %client.info.id,
                        filter = %sub.filter,
                        reason = %rejection,
                        "Subscription refused"
                    );
                    return SUBSCRIBE_REFUSED;
                }
                let qos = sub.qos.min(MAX_QOS);
                client.subscribe(sub.filter.clone(), qos);
                qos
            })
            .collect();

        self.send(
            client,
            ServerFrame::Suback {
                reason_codes: reason_codes.clone(),
            },
        );
        self.hooks
            .dispatch(&Event::Subscribed {
                client: &client.info,
                subscriptions: &filters,
                reason_codes: &reason_codes,
            })
            .ok();
    }

    fn unsubscribe(&self, client: &Arc<Client>, filters: Vec<String>) {
        let mut removed = Vec::with_capacity(filters.len());
        for filter in filters {
            if client.unsubscribe(&filter) {
                removed.push(filter);
            }
        }
        self.send(client, ServerFrame::Unsuback);
        if removed.is_empty() {
            return;
        }
        self.hooks
            .dispatch(&Event::Unsubscribed {
                client: &client.info,
                filters: &removed,
            })
            .ok();
    }

    fn publish(&self, client: &Arc<Client>, message: Message) {
        let verdict = if topic::valid_topic(&message.topic) {
            self.check_acl(&client.info, &message.topic, Access::Write)
                .and_then(|_| {
                    self.hooks.dispatch(&Event::Publish {
                        client: &client.info,
                        message: &message,
                    })
                })
                .map_err(|rejection| rejection.reason)
        } else {
            Err(format!("invalid topic '{}'", message.topic))
        };

        if let Err(reason) = verdict {
            tracing::debug!(
                client_id = %client.info.id,
                topic = %message.topic,
                reason = %reason,
                "Publish refused"
            );
            self.send(
                client,
                ServerFrame::Puback {
                    accepted: false,
                    reason: Some(reason),
                },
            );
            return;
        }

        let delivered = self.route(&message);
        tracing::trace!(topic = %message.topic, delivered, "Message routed");
        self.hooks
            .dispatch(&Event::Published {
                client: &client.info,
                message: &message,
            })
            .ok();
        self.send(
            client,
            ServerFrame::Puback {
                accepted: true,
                reason: None,
            },
        );
    }

    /// Deliver to every subscribed client; returns the number of receivers.
    fn route(&self, message: &Message) -> usize {
        let receivers: Vec<(Arc<Client>, u8)> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .filter_map(|entry| {
                entry
                    .value()
                    .matching_qos(&message.topic)
                    .map(|qos| (Arc::clone(entry.value()), qos))
            })
            .collect();

        let payload = String::from_utf8_lossy(&message.payload).into_owned();
        let mut delivered = 0;
        for (receiver, qos) in receivers {
            let frame = ServerFrame::Message {
                topic: message.topic.clone(),
                payload: payload.clone(),
                qos: qos.min(message.qos),
                retain: false,
            };
            if self.send(&receiver, frame) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Queue `frame` for `client`. A client whose queue is full is
    /// disconnected as a slow consumer.
    fn send(&self, client: &Arc<Client>, frame: ServerFrame) -> bool {
        match client.send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    client_id = %client.info.id,
                    capacity = self.outbound_queue(),
                    "Outbound queue full, disconnecting slow consumer"
                );
                self.disconnect(client, DisconnectReason::SlowConsumer, false);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Stop accepting, disconnect every client, drain, and stop hooks.
    ///
    /// Idempotent: calls after the first return `Ok(())` immediately.
    pub async fn close(&self) -> Result<(), ShutdownError> {
        if self.closing.swap(true, Ordering::SeqCst) {
            tracing::debug!("Broker already closed");
            return Ok(());
        }
        self.state.send_replace(BrokerState::Closing);
        tracing::info!(clients = self.clients.len(), "Broker closing");

        self.shutdown.trigger();

        let clients: Vec<Arc<Client>> = self.clients.iter().map(|c| Arc::clone(c.value())).collect();
        for client in &clients {
            self.disconnect(client, DisconnectReason::ServerShutdown, false);
        }
        drop(clients);

        let grace = self.config.shutdown.grace_period_secs;
        let result = if self.tracker.wait_idle_for(grace.map(Duration::from_secs)).await {
            Ok(())
        } else {
            let remaining = self.tracker.active_count();
            tracing::error!(remaining, "Connections did not drain before the grace period");
            Err(ShutdownError::DrainTimeout {
                remaining,
                grace_secs: grace.unwrap_or_default(),
            })
        };

        self.hooks.dispatch(&Event::Stopped).ok();
        self.hooks.stop_all();
        self.bound.clear();
        self.state.send_replace(BrokerState::Closed);
        tracing::info!("Broker closed");
        result
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("hooks", &self.hooks)
            .field("listeners", &self.listeners)
            .field("clients", &self.clients.len())
            .field("state", &self.state())
            .finish()
    }
}
