//! Ordered hook registry and event dispatch.

use std::sync::Arc;
use thiserror::Error;

use super::event::{Event, EventKind};
use super::{Hook, HookError, HookOptions};

/// Errors raised while registering a hook.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A hook with this id is already registered.
    #[error("hook '{0}' is already registered")]
    DuplicateId(String),

    /// The hook's `init` callback failed.
    #[error("hook '{id}' failed to initialize: {source}")]
    Init {
        id: String,
        #[source]
        source: HookError,
    },
}

/// A gatekeeping hook declined the triggering action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} rejected by hook '{hook}': {reason}")]
pub struct Rejection {
    /// Id of the vetoing hook.
    pub hook: String,
    pub kind: EventKind,
    pub reason: String,
}

/// Ordered collection of hooks.
///
/// Registration order is dispatch order. The registry is mutated only through
/// `&mut self`, so once it is shared behind an `Arc` its membership is fixed
/// and dispatch needs no locking.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook after running its `init` callback.
    ///
    /// On error the registry is left untouched.
    pub fn add(&mut self, hook: Arc<dyn Hook>, options: &HookOptions) -> Result<(), RegistryError> {
        let id = hook.id().to_string();
        if self.hooks.iter().any(|h| h.id() == id) {
            return Err(RegistryError::DuplicateId(id));
        }

        hook.init(options)
            .map_err(|source| RegistryError::Init { id: id.clone(), source })?;

        tracing::debug!(
            hook = %id,
            provides = ?hook.provides().iter().collect::<Vec<_>>(),
            "Hook registered"
        );
        self.hooks.push(hook);
        Ok(())
    }

    /// Whether any registered hook handles `kind`.
    pub fn provides(&self, kind: EventKind) -> bool {
        self.hooks.iter().any(|h| h.provides().contains(kind))
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Registered hook ids in dispatch order.
    pub fn ids(&self) -> Vec<String> {
        self.hooks.iter().map(|h| h.id().to_string()).collect()
    }

    /// Route an event to every hook that provides its kind.
    ///
    /// Veto kinds stop at the first hook that declines and return the
    /// rejection. Notification kinds always reach every capable hook and
    /// return `Ok(())`.
    pub fn dispatch(&self, event: &Event<'_>) -> Result<(), Rejection> {
        let kind = event.kind();
        for hook in self.hooks.iter().filter(|h| h.provides().contains(kind)) {
            if let Err(veto) = invoke(hook.as_ref(), event) {
                tracing::debug!(
                    hook = %hook.id(),
                    kind = %kind,
                    reason = %veto.reason,
                    "Hook vetoed event"
                );
                return Err(Rejection {
                    hook: hook.id().to_string(),
                    kind,
                    reason: veto.reason,
                });
            }
        }
        Ok(())
    }

    /// Call `stop` on every hook in registration order.
    ///
    /// Failures are logged; every hook gets its turn.
    pub fn stop_all(&self) {
        for hook in &self.hooks {
            if let Err(e) = hook.stop() {
                tracing::warn!(hook = %hook.id(), error = %e, "Hook failed to stop");
            }
        }
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry").field("hooks", &self.ids()).finish()
    }
}

fn invoke(hook: &dyn Hook, event: &Event<'_>) -> Result<(), super::Veto> {
    match *event {
        Event::Started => hook.on_started(),
        Event::Stopped => hook.on_stopped(),
        Event::ConnectAuthenticate { client, connect } => {
            return hook.on_connect_authenticate(client, connect)
        }
        Event::AclCheck { client, topic, access } => return hook.on_acl_check(client, topic, access),
        Event::Connect { client, connect } => hook.on_connect(client, connect),
        Event::Disconnect { client, reason, expire } => hook.on_disconnect(client, reason, expire),
        Event::Subscribed {
            client,
            subscriptions,
            reason_codes,
        } => hook.on_subscribed(client, subscriptions, reason_codes),
        Event::Unsubscribed { client, filters } => hook.on_unsubscribed(client, filters),
        Event::Publish { client, message } => return hook.on_publish(client, message),
        Event::Published { client, message } => hook.on_published(client, message),
    }
    Ok(())
}
