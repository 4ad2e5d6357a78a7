// Copyright (C) Microsoft Corporation. All rights reserved.

//! Access control.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::caller::CallerContext;
use crate::descriptor::Domain;
use crate::error::Error;
use crate::error::KsResult;

/// Permission on a key.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyPerm {
    /// Delete the key
    Delete = 1 << 0,

    /// Read metadata
    GetInfo = 1 << 1,

    /// Grant access to other uids
    Grant = 1 << 2,

    /// Use caller managed blobs in the namespace
    ManageBlob = 1 << 3,

    /// Create or replace an alias
    Rebind = 1 << 4,

    /// Start operations that are never pruned
    ReqForcedOp = 1 << 5,

    /// Update certificates
    Update = 1 << 6,

    /// Start operations
    Use = 1 << 7,

    /// Create auth-bound keys without LSKF binding
    UseNoLskfBinding = 1 << 8,

    /// Convert storage keys to ephemeral keys
    ConvertStorageKeyToEphemeral = 1 << 9,
}

impl KeyPerm {
    /// Every key permission.
    pub const ALL: [KeyPerm; 10] = [
        KeyPerm::Delete,
        KeyPerm::GetInfo,
        KeyPerm::Grant,
        KeyPerm::ManageBlob,
        KeyPerm::Rebind,
        KeyPerm::ReqForcedOp,
        KeyPerm::Update,
        KeyPerm::Use,
        KeyPerm::UseNoLskfBinding,
        KeyPerm::ConvertStorageKeyToEphemeral,
    ];
}

bitflags::bitflags! {
    /// A set of [`KeyPerm`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct KeyPermSet: u32 {
        /// [`KeyPerm::Delete`]
        const DELETE = KeyPerm::Delete as u32;
        /// [`KeyPerm::GetInfo`]
        const GET_INFO = KeyPerm::GetInfo as u32;
        /// [`KeyPerm::Grant`]
        const GRANT = KeyPerm::Grant as u32;
        /// [`KeyPerm::ManageBlob`]
        const MANAGE_BLOB = KeyPerm::ManageBlob as u32;
        /// [`KeyPerm::Rebind`]
        const REBIND = KeyPerm::Rebind as u32;
        /// [`KeyPerm::ReqForcedOp`]
        const REQ_FORCED_OP = KeyPerm::ReqForcedOp as u32;
        /// [`KeyPerm::Update`]
        const UPDATE = KeyPerm::Update as u32;
        /// [`KeyPerm::Use`]
        const USE = KeyPerm::Use as u32;
        /// [`KeyPerm::UseNoLskfBinding`]
        const USE_NO_LSKF_BINDING = KeyPerm::UseNoLskfBinding as u32;
        /// [`KeyPerm::ConvertStorageKeyToEphemeral`]
        const CONVERT_STORAGE_KEY_TO_EPHEMERAL = KeyPerm::ConvertStorageKeyToEphemeral as u32;
    }
}

impl KeyPermSet {
    /// Members of the set.
    pub fn perms(self) -> impl Iterator<Item = KeyPerm> {
        self.iter().filter_map(|flag| {
            KeyPerm::ALL
                .into_iter()
                .find(|perm| KeyPermSet::from(*perm) == flag)
        })
    }
}

impl From<KeyPerm> for KeyPermSet {
    fn from(perm: KeyPerm) -> Self {
        Self::from_bits_retain(perm as u32)
    }
}

impl From<&[KeyPerm]> for KeyPermSet {
    fn from(perms: &[KeyPerm]) -> Self {
        perms.iter().map(|perm| KeyPermSet::from(*perm)).collect()
    }
}

/// Permissions an app holds on its own namespace.
pub const APP_DEFAULT_PERMS: KeyPermSet = KeyPermSet::DELETE
    .union(KeyPermSet::GET_INFO)
    .union(KeyPermSet::GRANT)
    .union(KeyPermSet::REBIND)
    .union(KeyPermSet::UPDATE)
    .union(KeyPermSet::USE);

/// Service wide permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeystorePerm {
    /// Submit auth tokens
    AddAuth,

    /// Set, change or clear a user's password
    ChangePassword,

    /// Lock a user
    Lock,

    /// Unlock a user
    Unlock,
}

/// Security context that owns a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyContext {
    /// App namespace of a uid
    App(u32),

    /// SELinux keystore namespace
    Selinux(i64),
}

impl KeyContext {
    /// Context owning keys stored under `(domain, nspace)`.
    pub(crate) fn for_namespace(domain: Domain, nspace: i64) -> KsResult<Self> {
        match domain {
            Domain::App => u32::try_from(nspace)
                .map(KeyContext::App)
                .map_err(|_| Error::invalid_arg()),
            Domain::Selinux | Domain::Blob => Ok(KeyContext::Selinux(nspace)),
            Domain::Grant | Domain::KeyId => Err(Error::invalid_arg()),
        }
    }
}

/// Access policy consulted by the service.
pub trait AccessPolicy: Send + Sync {
    /// Checks that `caller` holds `perm` on keys owned by `target`.
    ///
    /// # Error
    /// * `PERMISSION_DENIED` - The caller lacks `perm`
    fn check_key_permission(
        &self,
        caller: &CallerContext,
        target: KeyContext,
        perm: KeyPerm,
    ) -> KsResult<()>;

    /// Checks that `caller` holds the service permission `perm`.
    ///
    /// # Error
    /// * `PERMISSION_DENIED` - The caller lacks `perm`
    fn check_keystore_permission(&self, caller: &CallerContext, perm: KeystorePerm)
        -> KsResult<()>;
}

/// A uid with extra permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegedUid {
    /// Uid
    pub uid: u32,

    /// Extra key permissions on the uid's own namespace
    #[serde(default)]
    pub key_perms: Vec<KeyPerm>,

    /// Service permissions
    #[serde(default)]
    pub keystore_perms: Vec<KeystorePerm>,
}

/// Access of one uid to a SELinux namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceAccess {
    /// SELinux namespace
    pub nspace: i64,

    /// Uid granted access
    pub uid: u32,

    /// Permissions on keys in the namespace
    pub perms: Vec<KeyPerm>,
}

/// Policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Privileged uids
    pub privileged: Vec<PrivilegedUid>,

    /// SELinux namespace table
    pub namespaces: Vec<NamespaceAccess>,
}

/// Configuration driven [`AccessPolicy`].
///
/// Apps hold [`APP_DEFAULT_PERMS`] on their own namespace, plus any key
/// permissions listed for them as privileged. SELinux namespaces are
/// accessible only through the namespace table.
#[derive(Debug, Clone, Default)]
pub struct DefaultPolicy {
    config: PolicyConfig,
}

impl DefaultPolicy {
    /// Builds the policy from its configuration.
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    fn privileged(&self, uid: u32) -> Option<&PrivilegedUid> {
        self.config.privileged.iter().find(|p| p.uid == uid)
    }

    fn perms(&self, caller: &CallerContext, target: KeyContext) -> KeyPermSet {
        match target {
            KeyContext::App(uid) if uid == caller.uid => {
                let extra = self
                    .privileged(uid)
                    .map(|p| KeyPermSet::from(p.key_perms.as_slice()))
                    .unwrap_or_default();
                APP_DEFAULT_PERMS | extra
            }
            KeyContext::App(_) => KeyPermSet::empty(),
            KeyContext::Selinux(nspace) => self
                .config
                .namespaces
                .iter()
                .filter(|n| n.nspace == nspace && n.uid == caller.uid)
                .fold(KeyPermSet::empty(), |set, n| {
                    set | KeyPermSet::from(n.perms.as_slice())
                }),
        }
    }
}

impl AccessPolicy for DefaultPolicy {
    fn check_key_permission(
        &self,
        caller: &CallerContext,
        target: KeyContext,
        perm: KeyPerm,
    ) -> KsResult<()> {
        if self.perms(caller, target).contains(perm.into()) {
            Ok(())
        } else {
            tracing::debug!(uid = caller.uid, ?target, ?perm, "key permission denied");
            Err(Error::perm())
        }
    }

    fn check_keystore_permission(
        &self,
        caller: &CallerContext,
        perm: KeystorePerm,
    ) -> KsResult<()> {
        let granted: BTreeSet<KeystorePerm> = self
            .privileged(caller.uid)
            .map(|p| p.keystore_perms.iter().copied().collect())
            .unwrap_or_default();
        if granted.contains(&perm) {
            Ok(())
        } else {
            tracing::debug!(uid = caller.uid, ?perm, "keystore permission denied");
            Err(Error::perm())
        }
    }
}
