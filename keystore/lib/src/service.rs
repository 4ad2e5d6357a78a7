// Copyright (C) Microsoft Corporation. All rights reserved.

//! Service level entry points: security level lookup, entry management,
//! grants, auth tokens and user lock state.

use std::collections::HashMap;
use std::sync::Arc;

use ks2_keymint_interface::ErrorCode;
use ks2_keymint_interface::HardwareAuthToken;
use ks2_keymint_interface::KeyMintDevice;
use ks2_keymint_interface::SecurityLevel;
use ks2_keymint_sim::SoftKeyMint;
use tracing::instrument;

use crate::attestation::AttestationIdProvider;
use crate::attestation::ConfigAttestationIds;
use crate::attestation::NoRemoteProvisioning;
use crate::attestation::RemoteProvisioning;
use crate::caller::CallerContext;
use crate::config::ConfigError;
use crate::config::KeystoreConfig;
use crate::context::KeystoreContext;
use crate::database::NewEntry;
use crate::descriptor::Domain;
use crate::descriptor::KeyDescriptor;
use crate::error::Error;
use crate::error::KsResult;
use crate::error::ResponseCode;
use crate::permission::AccessPolicy;
use crate::permission::DefaultPolicy;
use crate::permission::KeyContext;
use crate::permission::KeyPerm;
use crate::permission::KeyPermSet;
use crate::permission::KeystorePerm;
use crate::resolver::KeyIdentity;
use crate::resolver::KeyTarget;
use crate::security_level::KeyManagement;
use crate::security_level::KeystoreSecurityLevel;
use crate::super_key::UserState;
use crate::types::KeyEntryResponse;

struct Backend {
    key_management: Arc<dyn KeyManagement>,
    device: Arc<dyn KeyMintDevice>,
}

/// The key management service.
///
/// Holds the key database, the access policy and one [`KeyManagement`] per
/// attached backend. Every method takes the identity of its caller.
pub struct KeystoreService {
    context: Arc<KeystoreContext>,
    max_operations: usize,
    backends: HashMap<SecurityLevel, Backend>,
}

impl KeystoreService {
    /// Creates a service without backends.
    ///
    /// # Arguments
    /// * `policy` - Access policy
    /// * `attestation_ids` - Source of attestation application ids
    /// * `remote_provisioning` - Pool of attestation keys
    /// * `max_operations` - Operation slots per security level
    pub fn new(
        policy: Box<dyn AccessPolicy>,
        attestation_ids: Box<dyn AttestationIdProvider>,
        remote_provisioning: Box<dyn RemoteProvisioning>,
        max_operations: usize,
    ) -> Self {
        Self {
            context: Arc::new(KeystoreContext::new(
                policy,
                attestation_ids,
                remote_provisioning,
            )),
            max_operations,
            backends: HashMap::new(),
        }
    }

    /// Creates a service with the software backends listed in `config`.
    pub fn from_config(config: &KeystoreConfig) -> Result<Self, ConfigError> {
        let mut service = Self::new(
            Box::new(DefaultPolicy::new(config.policy.clone())),
            Box::new(ConfigAttestationIds::new(config.application_ids.clone())),
            Box::new(NoRemoteProvisioning),
            config.max_operations,
        );
        for backend in &config.security_levels {
            let device = SoftKeyMint::new(backend.clone())?;
            service.add_security_level(device)?;
        }
        Ok(service)
    }

    /// Attaches a backend.
    ///
    /// # Error
    /// * `INVALID_ARGUMENT` - A backend of the same security level exists
    pub fn add_security_level<D: KeyMintDevice + 'static>(
        &mut self,
        device: D,
    ) -> KsResult<Arc<dyn KeyManagement>> {
        let device = Arc::new(device);
        let level =
            KeystoreSecurityLevel::new(device.clone(), self.context.clone(), self.max_operations)?;
        let security_level = level.security_level();
        if self.backends.contains_key(&security_level) {
            tracing::error!(?security_level, "security level attached twice");
            return Err(Error::invalid_arg());
        }
        let key_management: Arc<dyn KeyManagement> = Arc::new(level);
        self.backends.insert(
            security_level,
            Backend {
                key_management: key_management.clone(),
                device,
            },
        );
        Ok(key_management)
    }

    /// Returns the key management interface of a backend.
    ///
    /// # Error
    /// * `ErrorCode::HARDWARE_TYPE_UNAVAILABLE` - No such backend
    pub fn get_security_level(
        &self,
        security_level: SecurityLevel,
    ) -> KsResult<Arc<dyn KeyManagement>> {
        self.backends
            .get(&security_level)
            .map(|b| b.key_management.clone())
            .ok_or(Error::Km(ErrorCode::HARDWARE_TYPE_UNAVAILABLE))
    }

    /// Returns metadata of a stored key and the backend that holds it.
    ///
    /// # Error
    /// * `INVALID_ARGUMENT` - `BLOB` keys are not stored
    /// * `KEY_NOT_FOUND` - No such entry
    /// * `PERMISSION_DENIED` - The caller lacks `GET_INFO`
    #[instrument(skip_all, fields(uid = caller.uid, domain = ?key.domain), err)]
    pub fn get_key_entry(
        &self,
        caller: &CallerContext,
        key: &KeyDescriptor,
    ) -> KsResult<KeyEntryResponse> {
        if key.domain == Domain::Blob {
            return Err(Error::invalid_arg());
        }
        let resolved = self.context.resolve(caller, key, KeyPerm::GetInfo)?;
        let KeyIdentity::Stored(entry) = resolved.identity else {
            return Err(Error::sys());
        };
        let security_level = entry
            .security_level
            .and_then(|level| self.backends.get(&level))
            .map(|b| b.key_management.clone());
        Ok(KeyEntryResponse {
            security_level,
            metadata: entry.metadata(),
        })
    }

    /// Replaces the certificates of a stored key.
    ///
    /// If the key does not exist and only a chain is given, a
    /// certificate-only entry is created under the alias.
    ///
    /// # Arguments
    /// * `public_cert` - DER leaf certificate
    /// * `certificate_chain` - Concatenated DER certificates
    #[instrument(skip_all, fields(uid = caller.uid, domain = ?key.domain), err)]
    pub fn update_subcomponent(
        &self,
        caller: &CallerContext,
        key: &KeyDescriptor,
        public_cert: Option<Vec<u8>>,
        certificate_chain: Option<Vec<u8>>,
    ) -> KsResult<()> {
        if key.domain == Domain::Blob {
            return Err(Error::invalid_arg());
        }
        match self.context.resolve(caller, key, KeyPerm::Update) {
            Ok(resolved) => {
                let KeyIdentity::Stored(entry) = resolved.identity else {
                    return Err(Error::sys());
                };
                self.context
                    .db
                    .set_certificates(entry.id, public_cert, certificate_chain)
            }
            Err(Error::Rc(ResponseCode::KeyNotFound))
                if public_cert.is_none() && certificate_chain.is_some() =>
            {
                let KeyTarget::Alias {
                    domain,
                    nspace,
                    alias,
                } = self.context.resolve_target(caller, key)?
                else {
                    return Err(Error::invalid_arg());
                };
                self.context.db.store_key(
                    domain,
                    nspace,
                    &alias,
                    NewEntry {
                        security_level: None,
                        blob: None,
                        authorizations: Vec::new(),
                        certificate: None,
                        certificate_chain,
                    },
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Lists aliases in a namespace.
    ///
    /// # Arguments
    /// * `domain` - `APP` (the caller's own namespace) or `SELINUX`
    /// * `nspace` - Namespace for `SELINUX`; ignored for `APP`
    pub fn list_entries(
        &self,
        caller: &CallerContext,
        domain: Domain,
        nspace: i64,
    ) -> KsResult<Vec<KeyDescriptor>> {
        let nspace = match domain {
            Domain::App => caller.uid as i64,
            Domain::Selinux => nspace,
            _ => return Err(Error::invalid_arg()),
        };
        let context = KeyContext::for_namespace(domain, nspace)?;
        self.context
            .policy
            .check_key_permission(caller, context, KeyPerm::GetInfo)?;
        Ok(self
            .context
            .db
            .list(domain, nspace)
            .into_iter()
            .map(|alias| KeyDescriptor {
                domain,
                nspace,
                alias: Some(alias),
                blob: None,
            })
            .collect())
    }

    /// Removes a stored key, its grants and its backend blob.
    ///
    /// # Error
    /// * `INVALID_ARGUMENT` - `BLOB` keys are deleted through their
    ///   security level
    #[instrument(skip_all, fields(uid = caller.uid, domain = ?key.domain), err)]
    pub fn delete_key(&self, caller: &CallerContext, key: &KeyDescriptor) -> KsResult<()> {
        if key.domain == Domain::Blob {
            return Err(Error::invalid_arg());
        }
        let resolved = self.context.resolve(caller, key, KeyPerm::Delete)?;
        let KeyIdentity::Stored(entry) = resolved.identity else {
            return Err(Error::sys());
        };
        let entry = self.context.db.unbind(entry.id)?;
        if let Some(backend) = entry.security_level.and_then(|l| self.backends.get(&l)) {
            self.context
                .delete_entry_blob(backend.device.as_ref(), &entry);
        }
        Ok(())
    }

    /// Grants `access` on a stored key to `grantee_uid`.
    ///
    /// The caller must hold `GRANT` and every permission it hands out.
    /// `GRANT` itself cannot be granted.
    ///
    /// # Returns
    /// * `KeyDescriptor` - `GRANT` descriptor the grantee uses
    #[instrument(skip_all, fields(uid = caller.uid, grantee_uid = grantee_uid), err)]
    pub fn grant(
        &self,
        caller: &CallerContext,
        key: &KeyDescriptor,
        grantee_uid: u32,
        access: KeyPermSet,
    ) -> KsResult<KeyDescriptor> {
        if access.contains(KeyPermSet::GRANT) {
            return Err(Error::perm());
        }
        let resolved = self.context.resolve(caller, key, KeyPerm::Grant)?;
        for perm in access.perms() {
            self.context
                .policy
                .check_key_permission(caller, resolved.context, perm)?;
        }
        let KeyIdentity::Stored(entry) = resolved.identity else {
            return Err(Error::invalid_arg());
        };
        let grant_id = self.context.db.grant(entry.id, grantee_uid, access)?;
        Ok(KeyDescriptor::grant(grant_id))
    }

    /// Revokes the grant of a stored key to `grantee_uid`.
    ///
    /// # Error
    /// * `KEY_NOT_FOUND` - No such key or grant
    #[instrument(skip_all, fields(uid = caller.uid, grantee_uid = grantee_uid), err)]
    pub fn ungrant(
        &self,
        caller: &CallerContext,
        key: &KeyDescriptor,
        grantee_uid: u32,
    ) -> KsResult<()> {
        let resolved = self.context.resolve(caller, key, KeyPerm::Grant)?;
        let KeyIdentity::Stored(entry) = resolved.identity else {
            return Err(Error::invalid_arg());
        };
        self.context.db.ungrant(entry.id, grantee_uid)
    }

    /// Delivers an auth token from the authentication subsystem.
    ///
    /// Tokens are cached as received; their MAC is not verified.
    pub fn add_auth_token(
        &self,
        caller: &CallerContext,
        token: HardwareAuthToken,
    ) -> KsResult<()> {
        self.context
            .policy
            .check_keystore_permission(caller, KeystorePerm::AddAuth)?;
        self.context.tokens.add(token);
        Ok(())
    }

    /// Lock screen state of `user_id`.
    pub fn get_user_state(&self, user_id: u32) -> UserState {
        self.context.super_keys.state(user_id)
    }

    /// Sets the first lock screen password of a user.
    pub fn init_user(&self, caller: &CallerContext, user_id: u32, password: &[u8]) -> KsResult<()> {
        self.context
            .policy
            .check_keystore_permission(caller, KeystorePerm::ChangePassword)?;
        self.context.super_keys.init_user(user_id, password)
    }

    /// Changes the lock screen password of a user.
    ///
    /// # Error
    /// * `PERMISSION_DENIED` - Missing permission or wrong `old_password`
    pub fn change_user_password(
        &self,
        caller: &CallerContext,
        user_id: u32,
        old_password: &[u8],
        new_password: &[u8],
    ) -> KsResult<()> {
        self.context
            .policy
            .check_keystore_permission(caller, KeystorePerm::ChangePassword)?;
        self.context
            .super_keys
            .change_password(user_id, old_password, new_password)
    }

    /// Removes the lock screen of a user. Auth-bound keys of the user become
    /// permanently invalid.
    pub fn reset_user(&self, caller: &CallerContext, user_id: u32) -> KsResult<()> {
        self.context
            .policy
            .check_keystore_permission(caller, KeystorePerm::ChangePassword)?;
        self.context.super_keys.reset_user(user_id);
        Ok(())
    }

    /// Unlocks a user with its lock screen password.
    pub fn unlock_user(
        &self,
        caller: &CallerContext,
        user_id: u32,
        password: &[u8],
    ) -> KsResult<()> {
        self.context
            .policy
            .check_keystore_permission(caller, KeystorePerm::Unlock)?;
        self.context.super_keys.unlock_user(user_id, password)
    }

    /// Drops the super key of a user from memory.
    pub fn lock_user(&self, caller: &CallerContext, user_id: u32) -> KsResult<()> {
        self.context
            .policy
            .check_keystore_permission(caller, KeystorePerm::Lock)?;
        self.context.super_keys.lock_user(user_id)
    }
}
