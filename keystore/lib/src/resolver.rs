// Copyright (C) Microsoft Corporation. All rights reserved.

//! Key descriptor resolution and access checks.

use crate::caller::CallerContext;
use crate::context::KeystoreContext;
use crate::database::KeyEntry;
use crate::descriptor::Domain;
use crate::descriptor::KeyDescriptor;
use crate::descriptor::KeyRef;
use crate::error::Error;
use crate::error::KsResult;
use crate::permission::KeyContext;
use crate::permission::KeyPerm;

/// What a descriptor resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum KeyIdentity {
    /// An entry of the key database
    Stored(KeyEntry),

    /// A caller-held blob
    Transient(Vec<u8>),
}

/// A resolved key together with the context that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedKey {
    pub identity: KeyIdentity,
    pub context: KeyContext,
}

/// Where a newly created key goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum KeyTarget {
    Alias {
        domain: Domain,
        nspace: i64,
        alias: String,
    },
    Blob {
        nspace: i64,
    },
}

impl KeyTarget {
    pub fn context(&self) -> KsResult<KeyContext> {
        match self {
            KeyTarget::Alias { domain, nspace, .. } => KeyContext::for_namespace(*domain, *nspace),
            KeyTarget::Blob { nspace } => Ok(KeyContext::Selinux(*nspace)),
        }
    }
}

impl KeystoreContext {
    /// Checks `perm` on a `BLOB` namespace. Caller-held blobs also need
    /// `MANAGE_BLOB`.
    fn check_blob_permission(
        &self,
        caller: &CallerContext,
        nspace: i64,
        perm: KeyPerm,
    ) -> KsResult<KeyContext> {
        let context = KeyContext::Selinux(nspace);
        self.policy
            .check_key_permission(caller, context, KeyPerm::ManageBlob)?;
        if perm != KeyPerm::ManageBlob {
            self.policy.check_key_permission(caller, context, perm)?;
        }
        Ok(context)
    }

    /// Resolves `key` for `caller` and checks `perm` on it.
    ///
    /// Every call consults the database again; nothing is cached between
    /// calls.
    ///
    /// # Error
    /// * `INVALID_ARGUMENT` - The descriptor is malformed for its domain
    /// * `KEY_NOT_FOUND` - No entry, or no grant for the caller
    /// * `PERMISSION_DENIED` - The caller lacks `perm`
    pub fn resolve(
        &self,
        caller: &CallerContext,
        key: &KeyDescriptor,
        perm: KeyPerm,
    ) -> KsResult<ResolvedKey> {
        let resolved = match key.key_ref(caller)? {
            KeyRef::Blob { nspace, blob } => ResolvedKey {
                context: self.check_blob_permission(caller, nspace, perm)?,
                identity: KeyIdentity::Transient(blob.to_vec()),
            },
            KeyRef::Grant(grant_id) => {
                let (entry, access) = self.db.load_grant(grant_id, caller.uid)?;
                if !access.contains(perm.into()) {
                    tracing::debug!(grant_id, ?perm, "grant does not cover permission");
                    return Err(Error::perm());
                }
                ResolvedKey {
                    context: entry.context()?,
                    identity: KeyIdentity::Stored(entry),
                }
            }
            KeyRef::Alias {
                domain,
                nspace,
                alias,
            } => {
                let context = KeyContext::for_namespace(domain, nspace)?;
                self.policy.check_key_permission(caller, context, perm)?;
                let entry = self.db.load_by_alias(domain, nspace, alias)?;
                ResolvedKey {
                    context,
                    identity: KeyIdentity::Stored(entry),
                }
            }
            KeyRef::KeyId(key_id) => {
                let entry = self.db.load_by_id(key_id)?;
                let context = entry.context()?;
                if let Err(err) = self.policy.check_key_permission(caller, context, perm) {
                    match self.db.granted_access(key_id, caller.uid) {
                        Some(access) if access.contains(perm.into()) => {}
                        _ => return Err(err),
                    }
                }
                ResolvedKey {
                    context,
                    identity: KeyIdentity::Stored(entry),
                }
            }
        };
        Ok(resolved)
    }

    /// Validates the destination of a key about to be created.
    ///
    /// # Error
    /// * `INVALID_ARGUMENT` - `GRANT` and `KEY_ID` cannot name new keys
    /// * `PERMISSION_DENIED` - The caller may not bind keys there
    pub fn resolve_target(
        &self,
        caller: &CallerContext,
        key: &KeyDescriptor,
    ) -> KsResult<KeyTarget> {
        match key.domain {
            Domain::App | Domain::Selinux => {
                let KeyRef::Alias {
                    domain,
                    nspace,
                    alias,
                } = key.key_ref(caller)?
                else {
                    return Err(Error::invalid_arg());
                };
                let context = KeyContext::for_namespace(domain, nspace)?;
                self.policy
                    .check_key_permission(caller, context, KeyPerm::Rebind)?;
                Ok(KeyTarget::Alias {
                    domain,
                    nspace,
                    alias: alias.to_owned(),
                })
            }
            Domain::Blob => {
                self.check_blob_permission(caller, key.nspace, KeyPerm::Rebind)?;
                Ok(KeyTarget::Blob { nspace: key.nspace })
            }
            Domain::Grant | Domain::KeyId => Err(Error::invalid_arg()),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_with_tracing::test;

    use super::*;
    use crate::attestation::ConfigAttestationIds;
    use crate::attestation::NoRemoteProvisioning;
    use crate::database::NewEntry;
    use crate::database::StoredBlob;
    use crate::permission::DefaultPolicy;
    use crate::permission::KeyPermSet;
    use crate::permission::NamespaceAccess;
    use crate::permission::PolicyConfig;

    const OWNER: u32 = 10_001;
    const OTHER: u32 = 10_002;
    const SYSTEM: u32 = 1_000;

    fn context() -> KeystoreContext {
        let config = PolicyConfig {
            privileged: vec![],
            namespaces: vec![NamespaceAccess {
                nspace: 42,
                uid: SYSTEM,
                perms: vec![KeyPerm::Use, KeyPerm::ManageBlob, KeyPerm::Rebind],
            }],
        };
        KeystoreContext::new(
            Box::new(DefaultPolicy::new(config)),
            Box::new(ConfigAttestationIds::default()),
            Box::new(NoRemoteProvisioning),
        )
    }

    fn store(ctx: &KeystoreContext, uid: u32, alias: &str) -> i64 {
        let entry = NewEntry {
            security_level: None,
            blob: Some(StoredBlob::Plain(vec![1])),
            authorizations: vec![],
            certificate: None,
            certificate_chain: None,
        };
        ctx.db.store_key(Domain::App, uid as i64, alias, entry).0
    }

    #[test]
    fn test_app_alias_uses_caller_uid() {
        let ctx = context();
        let id = store(&ctx, OWNER, "k");
        let owner = CallerContext::new(OWNER);
        let resolved = ctx
            .resolve(&owner, &KeyDescriptor::app("k"), KeyPerm::Use)
            .expect("resolve");
        assert_eq!(resolved.context, KeyContext::App(OWNER));
        assert!(matches!(resolved.identity, KeyIdentity::Stored(ref e) if e.id == id));

        let other = CallerContext::new(OTHER);
        assert_eq!(
            ctx.resolve(&other, &KeyDescriptor::app("k"), KeyPerm::Use),
            Err(Error::not_found())
        );
    }

    #[test]
    fn test_key_id_of_other_app_denied() {
        let ctx = context();
        let id = store(&ctx, OWNER, "k");
        let other = CallerContext::new(OTHER);
        assert_eq!(
            ctx.resolve(&other, &KeyDescriptor::key_id(id), KeyPerm::Use),
            Err(Error::perm())
        );
        ctx.db
            .grant(id, OTHER, KeyPermSet::USE)
            .expect("grant");
        assert!(ctx
            .resolve(&other, &KeyDescriptor::key_id(id), KeyPerm::Use)
            .is_ok());
        assert_eq!(
            ctx.resolve(&other, &KeyDescriptor::key_id(id), KeyPerm::Delete),
            Err(Error::perm())
        );
    }

    #[test]
    fn test_grant_resolution() {
        let ctx = context();
        let id = store(&ctx, OWNER, "k");
        let grant_id = ctx
            .db
            .grant(id, OTHER, KeyPermSet::USE)
            .expect("grant");
        let other = CallerContext::new(OTHER);
        let resolved = ctx
            .resolve(&other, &KeyDescriptor::grant(grant_id), KeyPerm::Use)
            .expect("resolve");
        assert_eq!(resolved.context, KeyContext::App(OWNER));
        assert_eq!(
            ctx.resolve(&other, &KeyDescriptor::grant(grant_id), KeyPerm::Delete),
            Err(Error::perm())
        );

        let stranger = CallerContext::new(10_003);
        assert_eq!(
            ctx.resolve(&stranger, &KeyDescriptor::grant(grant_id), KeyPerm::Use),
            Err(Error::not_found())
        );
    }

    #[test]
    fn test_blob_needs_manage_blob() {
        let ctx = context();
        let desc = KeyDescriptor::blob(42, vec![9, 9]);
        let resolved = ctx
            .resolve(&CallerContext::new(SYSTEM), &desc, KeyPerm::Use)
            .expect("resolve");
        assert_eq!(resolved.identity, KeyIdentity::Transient(vec![9, 9]));
        assert_eq!(
            ctx.resolve(&CallerContext::new(OWNER), &desc, KeyPerm::Use),
            Err(Error::perm())
        );
    }

    #[test]
    fn test_targets() {
        let ctx = context();
        let owner = CallerContext::new(OWNER);
        assert_eq!(
            ctx.resolve_target(&owner, &KeyDescriptor::app("new")),
            Ok(KeyTarget::Alias {
                domain: Domain::App,
                nspace: OWNER as i64,
                alias: "new".to_owned(),
            })
        );
        assert_eq!(
            ctx.resolve_target(&owner, &KeyDescriptor::key_id(5)),
            Err(Error::invalid_arg())
        );
        assert_eq!(
            ctx.resolve_target(&owner, &KeyDescriptor::selinux(42, "x")),
            Err(Error::perm())
        );
        let blob = KeyDescriptor {
            domain: Domain::Blob,
            nspace: 42,
            alias: None,
            blob: None,
        };
        assert_eq!(
            ctx.resolve_target(&CallerContext::new(SYSTEM), &blob),
            Ok(KeyTarget::Blob { nspace: 42 })
        );
    }
}
