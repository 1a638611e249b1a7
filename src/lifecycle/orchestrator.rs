//! Process lifecycle orchestration.
//!
//! # State Machine
//! ```text
//! Initializing ──register hooks/listeners──▶ start()
//!      │                                      │
//!      │ registration error                   │ bind failure
//!      ▼                                      ▼
//!   Stopped ◀──────────────────────────── Stopped
//!                                             │ all listeners bound
//!                                             ▼
//!                                          Serving ──signal──▶ ShuttingDown ──close()──▶ Stopped
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and never retried
//! - The broker is owned by value while initializing; `start` moves it
//!   into an `Arc`, after which registration is impossible
//! - The shutdown trigger is a future; `main` passes the OS signal wait

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};

use super::signals::{ShutdownSignal, Signals};
use crate::broker::{Broker, BrokerError, BrokerState, ShutdownError};
use crate::config::{BrokerConfig, PolicyKind};
use crate::hooks::{AllowHook, AuditHook, DenyHook, Hook, HookOptions, StatsHook};
use crate::net::ListenerBinding;

/// Orchestrator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Initializing,
    Serving,
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Initializing => "initializing",
            LifecycleState::Serving => "serving",
            LifecycleState::ShuttingDown => "shutting_down",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Errors surfaced at the process boundary.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("startup failed: {0}")]
    Startup(#[source] BrokerError),

    #[error("failed to set up hook '{hook}': {source}")]
    HookSetup {
        hook: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("serve loop failed: {0}")]
    Serve(#[source] BrokerError),

    #[error("serve loop exited before shutdown was requested")]
    ServeExited,

    #[error("serve task failed: {0}")]
    Join(#[from] JoinError),

    #[error("shutdown failed: {0}")]
    Shutdown(#[from] ShutdownError),

    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] std::io::Error),

    #[error("orchestrator stopped after an earlier startup failure")]
    Stopped,
}

/// Builds a broker and drives it through its lifecycle.
pub struct Orchestrator {
    broker: Broker,
    state: LifecycleState,
    stats: Option<Arc<StatsHook>>,
}

impl Orchestrator {
    /// Orchestrator around an empty broker (no hooks, no listeners).
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            broker: Broker::new(config),
            state: LifecycleState::Initializing,
            stats: None,
        }
    }

    /// Orchestrator with the built-in hooks and listeners named in `config`.
    ///
    /// Registration order: policy hook, audit hook, stats hook, then
    /// listeners in file order.
    pub fn from_config(config: BrokerConfig) -> Result<Self, LifecycleError> {
        let mut orchestrator = Self::new(config.clone());

        let policy: Arc<dyn Hook> = match config.hooks.policy {
            PolicyKind::AllowAll => Arc::new(AllowHook),
            PolicyKind::DenyAll => Arc::new(DenyHook),
        };
        orchestrator.add_hook(policy, HookOptions::new())?;

        if config.hooks.audit.enabled {
            let audit = match AuditHook::from_config(&config.hooks.audit) {
                Ok(audit) => audit,
                Err(source) => {
                    let error = LifecycleError::HookSetup {
                        hook: "audit-log",
                        source,
                    };
                    orchestrator.abort(&error);
                    return Err(error);
                }
            };
            orchestrator.add_hook(Arc::new(audit), HookOptions::new())?;
        }

        if config.hooks.stats {
            let stats = Arc::new(StatsHook::new());
            orchestrator.add_hook(stats.clone(), HookOptions::new())?;
            orchestrator.stats = Some(stats);
        }

        for listener in &config.listeners {
            orchestrator.add_listener(listener.binding())?;
        }
        Ok(orchestrator)
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// The stats hook registered by [`from_config`](Self::from_config).
    pub fn stats(&self) -> Option<Arc<StatsHook>> {
        self.stats.clone()
    }

    /// Register a hook. A failure stops the orchestrator.
    pub fn add_hook(&mut self, hook: Arc<dyn Hook>, options: HookOptions) -> Result<(), LifecycleError> {
        self.ensure_initializing()?;
        let result = self.broker.add_hook(hook, options);
        result.map_err(|e| self.fail(e))
    }

    /// Register a listener binding. A failure stops the orchestrator.
    pub fn add_listener(&mut self, binding: ListenerBinding) -> Result<(), LifecycleError> {
        self.ensure_initializing()?;
        let result = self.broker.add_listener(binding);
        result.map_err(|e| self.fail(e))
    }

    fn ensure_initializing(&self) -> Result<(), LifecycleError> {
        match self.state {
            LifecycleState::Initializing => Ok(()),
            _ => Err(LifecycleError::Stopped),
        }
    }

    fn fail(&mut self, error: BrokerError) -> LifecycleError {
        let error = LifecycleError::Startup(error);
        self.abort(&error);
        error
    }

    /// Give up on startup: stop the hooks already initialized.
    fn abort(&mut self, error: &LifecycleError) {
        tracing::error!(error = %error, "Startup failed");
        self.broker.hooks().stop_all();
        transition(&mut self.state, LifecycleState::Stopped);
    }

    /// Spawn the serve loop and wait until every listener is bound.
    pub async fn start(self) -> Result<Running, LifecycleError> {
        let Orchestrator {
            broker,
            mut state,
            stats,
        } = self;
        if state != LifecycleState::Initializing {
            return Err(LifecycleError::Stopped);
        }

        let broker = Arc::new(broker);
        let mut broker_state = broker.subscribe_state();
        let mut serve = tokio::spawn(Arc::clone(&broker).serve());

        tokio::select! {
            finished = &mut serve => {
                transition(&mut state, LifecycleState::Stopped);
                let error = match finished {
                    Ok(Err(e)) => LifecycleError::Startup(e),
                    Ok(Ok(())) => LifecycleError::ServeExited,
                    Err(e) => LifecycleError::Join(e),
                };
                tracing::error!(error = %error, "Startup failed");
                broker.hooks().stop_all();
                return Err(error);
            }
            _ = broker_state.wait_for(|s| *s == BrokerState::Serving) => {}
        }

        transition(&mut state, LifecycleState::Serving);
        for binding in broker.listeners() {
            tracing::info!(
                listener = %binding.id,
                address = %broker.listener_addr(&binding.id).unwrap_or_default(),
                "Broker started"
            );
        }

        Ok(Running {
            broker,
            serve,
            state,
            stats,
        })
    }

    /// Start, then shut down once `signal` resolves.
    pub async fn run<F>(self, signal: F) -> Result<ShutdownSignal, LifecycleError>
    where
        F: Future<Output = ShutdownSignal>,
    {
        self.start().await?.shutdown_on(signal).await
    }

    /// Start, then shut down on SIGINT / SIGTERM.
    pub async fn run_until_signal(mut self) -> Result<ShutdownSignal, LifecycleError> {
        let mut signals = match Signals::install() {
            Ok(signals) => signals,
            Err(e) => {
                transition(&mut self.state, LifecycleState::Stopped);
                return Err(LifecycleError::Signal(e));
            }
        };
        self.run(async move { signals.recv().await }).await
    }
}

/// A serving broker.
pub struct Running {
    broker: Arc<Broker>,
    serve: JoinHandle<Result<(), BrokerError>>,
    state: LifecycleState,
    stats: Option<Arc<StatsHook>>,
}

impl Running {
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn stats(&self) -> Option<Arc<StatsHook>> {
        self.stats.clone()
    }

    /// Wait for `signal`, then close the broker and the serve loop.
    ///
    /// If the serve loop dies first the broker is still closed, and the
    /// serve failure is returned.
    pub async fn shutdown_on<F>(mut self, signal: F) -> Result<ShutdownSignal, LifecycleError>
    where
        F: Future<Output = ShutdownSignal>,
    {
        tokio::pin!(signal);

        let (received, early_exit) = tokio::select! {
            received = &mut signal => (Some(received), None),
            finished = &mut self.serve => (None, Some(finished)),
        };
        match received {
            Some(received) => tracing::info!(signal = %received, "Shutdown signal received"),
            None => tracing::error!("Serve loop exited unexpectedly"),
        }

        transition(&mut self.state, LifecycleState::ShuttingDown);
        let closed = self.broker.close().await;
        let finished = match early_exit {
            Some(finished) => finished,
            None => (&mut self.serve).await,
        };
        transition(&mut self.state, LifecycleState::Stopped);

        if let Err(e) = closed {
            tracing::error!(error = %e, "Shutdown failed");
            return Err(e.into());
        }
        match (finished, received) {
            (Err(e), _) => Err(LifecycleError::Join(e)),
            (Ok(Err(e)), _) => Err(LifecycleError::Serve(e)),
            (Ok(Ok(())), Some(received)) => {
                tracing::info!("Shutdown complete");
                Ok(received)
            }
            (Ok(Ok(())), None) => Err(LifecycleError::ServeExited),
        }
    }
}

fn transition(state: &mut LifecycleState, next: LifecycleState) {
    if *state != next {
        tracing::info!(from = %state, to = %next, "Lifecycle transition");
        *state = next;
    }
}
