//! Authorization policy hooks.
//!
//! Both hooks provide only the gatekeeping kinds (`ConnectAuthenticate`,
//! `AclCheck`). Stricter policies (ACL tables, token checks) implement the
//! same two callbacks.

use super::event::{Access, ClientInfo, ConnectRequest, EventKind, KindSet};
use super::{Hook, Veto};

const POLICY_KINDS: KindSet = KindSet::of(&[EventKind::ConnectAuthenticate, EventKind::AclCheck]);

/// Allows every connection and every topic access.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowHook;

impl Hook for AllowHook {
    fn id(&self) -> &str {
        "allow-all"
    }

    fn provides(&self) -> KindSet {
        POLICY_KINDS
    }

    fn on_connect_authenticate(
        &self,
        _client: &ClientInfo,
        _connect: &ConnectRequest,
    ) -> Result<(), Veto> {
        Ok(())
    }

    fn on_acl_check(&self, _client: &ClientInfo, _topic: &str, _access: Access) -> Result<(), Veto> {
        Ok(())
    }
}

/// Denies every connection and every topic access.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyHook;

impl Hook for DenyHook {
    fn id(&self) -> &str {
        "deny-all"
    }

    fn provides(&self) -> KindSet {
        POLICY_KINDS
    }

    fn on_connect_authenticate(
        &self,
        client: &ClientInfo,
        _connect: &ConnectRequest,
    ) -> Result<(), Veto> {
        Err(Veto::new(format!("client '{}' not authorized", client.id)))
    }

    fn on_acl_check(&self, _client: &ClientInfo, topic: &str, access: Access) -> Result<(), Veto> {
        Err(Veto::new(format!("{} access to '{}' denied", access, topic)))
    }
}
