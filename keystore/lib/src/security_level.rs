// Copyright (C) Microsoft Corporation. All rights reserved.

//! Per-backend key lifecycle and operation admission.

use std::sync::Arc;

use ks2_keymint_interface::AttestationKey;
use ks2_keymint_interface::BeginResult;
use ks2_keymint_interface::BlockMode;
use ks2_keymint_interface::ErrorCode;
use ks2_keymint_interface::HardwareAuthToken;
use ks2_keymint_interface::KeyCreationResult;
use ks2_keymint_interface::KeyFormat;
use ks2_keymint_interface::KeyMintDevice;
use ks2_keymint_interface::KeyMintHardwareInfo;
use ks2_keymint_interface::KeyParameter;
use ks2_keymint_interface::KeyParameterSet;
use ks2_keymint_interface::KeyPurpose;
use ks2_keymint_interface::KmResult;
use ks2_keymint_interface::SecurityLevel;
use ks2_keymint_interface::Tag;
use ks2_keymint_interface::NO_SID;
use openssl::x509::X509;
use tracing::instrument;
use zeroize::Zeroizing;

use crate::caller::CallerContext;
use crate::context::KeystoreContext;
use crate::database::now_ms;
use crate::database::NewEntry;
use crate::database::StoredBlob;
use crate::descriptor::check_key_flags;
use crate::descriptor::Domain;
use crate::descriptor::KeyDescriptor;
use crate::descriptor::KeyRef;
use crate::descriptor::KeyFlags;
use crate::enforcements::AuthRequirement;
use crate::error::Error;
use crate::error::KsResult;
use crate::operation::KeystoreOperation;
use crate::operation::NewOperation;
use crate::operation::OperationDb;
use crate::permission::KeyContext;
use crate::permission::KeyPerm;
use crate::resolver::KeyIdentity;
use crate::resolver::KeyTarget;
use crate::resolver::ResolvedKey;
use crate::types::Authorization;
use crate::types::AuthenticatorSpec;
use crate::types::AuthenticatorType;
use crate::types::CreateOperationResponse;
use crate::types::EphemeralStorageKeyResponse;
use crate::types::KeyMetadata;

/// Masking key handed to the backend for wrapped imports.
const ZERO_MASKING_KEY: [u8; 32] = [0; 32];

/// Key management bound to one security level.
pub trait KeyManagement: Send + Sync {
    /// Security level of the backend.
    fn security_level(&self) -> SecurityLevel;

    /// Identification of the backend.
    fn hardware_info(&self) -> KsResult<KeyMintHardwareInfo>;

    /// Starts a cryptographic operation.
    ///
    /// # Arguments
    /// * `caller` - Calling identity
    /// * `key` - Key to use
    /// * `operation_parameters` - Must carry the purpose
    /// * `forced` - Request a slot that is never pruned
    ///
    /// # Returns
    /// * `CreateOperationResponse` - Operation handle, challenge if user
    ///   authentication is pending, backend parameters
    ///
    /// # Error
    /// * `BACKEND_BUSY` - No slot could be freed; retry later
    /// * `PERMISSION_DENIED` - The caller lacks `USE` or `REQ_FORCED_OP`
    /// * `LOCKED` - The key is bound to a locked user
    fn create_operation(
        &self,
        caller: &CallerContext,
        key: &KeyDescriptor,
        operation_parameters: &[KeyParameter],
        forced: bool,
    ) -> KsResult<CreateOperationResponse>;

    /// Generates a key and stores it under `key`.
    ///
    /// # Arguments
    /// * `caller` - Calling identity
    /// * `key` - Destination; `APP`, `SELINUX` or `BLOB`
    /// * `attestation_key` - Key that signs the new certificate, if any
    /// * `params` - Requested characteristics
    /// * `flags` - `KEY_FLAG_*` bits
    /// * `entropy` - Mixed into the backend RNG first; may be empty
    ///
    /// # Returns
    /// * `KeyMetadata` - `KEY_ID` descriptor for stored keys, `BLOB` otherwise
    fn generate_key(
        &self,
        caller: &CallerContext,
        key: &KeyDescriptor,
        attestation_key: Option<&KeyDescriptor>,
        params: &[KeyParameter],
        flags: i32,
        entropy: &[u8],
    ) -> KsResult<KeyMetadata>;

    /// Imports clear key material. Asymmetric keys are PKCS#8, symmetric
    /// keys raw.
    fn import_key(
        &self,
        caller: &CallerContext,
        key: &KeyDescriptor,
        attestation_key: Option<&KeyDescriptor>,
        params: &[KeyParameter],
        flags: i32,
        key_data: &[u8],
    ) -> KsResult<KeyMetadata>;

    /// Imports a key wrapped for the backend.
    ///
    /// # Arguments
    /// * `key` - `APP` or `SELINUX` destination; `blob` carries the wrapped
    ///   key record
    /// * `wrapping_key` - RSA key that unwraps the record
    /// * `masking_key` - Must be `None`
    /// * `params` - Unwrapping parameters
    /// * `authenticators` - Candidate authenticators for user secure ids
    ///
    /// # Error
    /// * `INVALID_ARGUMENT` - Missing wrapped data, a masking key, or a
    ///   `BLOB` destination
    /// * `KEY_NOT_FOUND` - The wrapping key does not exist
    fn import_wrapped_key(
        &self,
        caller: &CallerContext,
        key: &KeyDescriptor,
        wrapping_key: &KeyDescriptor,
        masking_key: Option<&[u8]>,
        params: &[KeyParameter],
        authenticators: &[AuthenticatorSpec],
    ) -> KsResult<KeyMetadata>;

    /// Converts a `BLOB` storage key into a per-boot ephemeral key.
    fn convert_storage_key_to_ephemeral(
        &self,
        caller: &CallerContext,
        storage_key: &KeyDescriptor,
    ) -> KsResult<EphemeralStorageKeyResponse>;

    /// Invalidates a `BLOB` key at the backend.
    fn delete_key(&self, caller: &CallerContext, key: &KeyDescriptor) -> KsResult<()>;
}

/// A key blob ready for the backend.
struct LoadedKey {
    /// Entry id; `None` for caller-held blobs
    key_id: Option<i64>,

    /// User whose super key protects the stored blob
    super_user: Option<u32>,
    blob: Zeroizing<Vec<u8>>,
    characteristics: Vec<KeyParameter>,
    certificate: Option<Vec<u8>>,
    certificate_chain: Option<Vec<u8>>,
}

impl LoadedKey {
    fn transient(blob: Vec<u8>) -> Self {
        Self {
            key_id: None,
            super_user: None,
            blob: Zeroizing::new(blob),
            characteristics: Vec::new(),
            certificate: None,
            certificate_chain: None,
        }
    }
}

/// [`KeyManagement`] over one KeyMint device.
pub struct KeystoreSecurityLevel<D: KeyMintDevice> {
    security_level: SecurityLevel,
    device: Arc<D>,
    context: Arc<KeystoreContext>,
    operations: OperationDb,
}

impl<D: KeyMintDevice> KeystoreSecurityLevel<D> {
    pub(crate) fn new(
        device: Arc<D>,
        context: Arc<KeystoreContext>,
        max_operations: usize,
    ) -> KsResult<Self> {
        let info = device.get_hardware_info()?;
        tracing::debug!(
            security_level = ?info.security_level,
            name = %info.keymint_name,
            max_operations,
            "security level attached"
        );
        Ok(Self {
            security_level: info.security_level,
            device,
            context,
            operations: OperationDb::new(max_operations),
        })
    }

    fn load_key(&self, resolved: ResolvedKey) -> KsResult<LoadedKey> {
        let entry = match resolved.identity {
            KeyIdentity::Transient(blob) => {
                let characteristics = self
                    .device
                    .get_key_characteristics(&blob)?
                    .into_iter()
                    .flat_map(|kc| kc.authorizations)
                    .collect();
                return Ok(LoadedKey {
                    characteristics,
                    ..LoadedKey::transient(blob)
                });
            }
            KeyIdentity::Stored(entry) => entry,
        };
        match entry.security_level {
            Some(level) if level == self.security_level => {}
            Some(level) => {
                tracing::debug!(key_id = entry.id, ?level, "key held by another security level");
                return Err(Error::invalid_arg());
            }
            None => return Err(Error::not_found()),
        }
        let characteristics = entry.key_parameters();
        let (blob, super_user) = match entry.blob {
            Some(StoredBlob::Plain(blob)) => (Zeroizing::new(blob), None),
            Some(StoredBlob::SuperEncrypted(encrypted)) => (
                self.context.super_keys.decrypt(&encrypted)?,
                Some(encrypted.user_id),
            ),
            None => return Err(Error::not_found()),
        };
        Ok(LoadedKey {
            key_id: Some(entry.id),
            super_user,
            blob,
            characteristics,
            certificate: entry.certificate,
            certificate_chain: entry.certificate_chain,
        })
    }

    /// Runs `f` on the key blob. If the backend asks for an upgrade, the
    /// blob is upgraded, persisted and `f` runs once more.
    ///
    /// # Returns
    /// * `(T, Option<Vec<u8>>)` - Result of `f` and the upgraded blob, if any
    fn upgrade_if_required<T>(
        &self,
        key: &mut LoadedKey,
        mut f: impl FnMut(&[u8]) -> KsResult<T>,
    ) -> KsResult<(T, Option<Vec<u8>>)> {
        match f(key.blob.as_slice()) {
            Err(Error::Km(ErrorCode::KEY_REQUIRES_UPGRADE)) => {}
            result => return result.map(|value| (value, None)),
        }
        let upgraded = self.device.upgrade_key(key.blob.as_slice(), &[])?;
        if upgraded.is_empty() {
            tracing::error!(key_id = ?key.key_id, "upgrade requested but none produced");
            return Err(Error::sys());
        }
        tracing::debug!(key_id = ?key.key_id, "key blob upgraded");
        if let Some(key_id) = key.key_id {
            let stored = match key.super_user {
                Some(user_id) => {
                    StoredBlob::SuperEncrypted(self.context.super_keys.encrypt(user_id, &upgraded)?)
                }
                None => StoredBlob::Plain(upgraded.clone()),
            };
            if let Err(err) = self.context.db.update_blob(key_id, stored) {
                tracing::debug!(key_id, ?err, "entry removed during upgrade");
            }
        }
        key.blob = Zeroizing::new(upgraded.clone());
        let value = f(key.blob.as_slice())?;
        Ok((value, Some(upgraded)))
    }

    fn begin_with_pruning(
        &self,
        caller: &CallerContext,
        forced: bool,
        purpose: KeyPurpose,
        blob: &[u8],
        params: &[KeyParameter],
        token: Option<&HardwareAuthToken>,
    ) -> KsResult<BeginResult> {
        loop {
            match self.device.begin(purpose, blob, params, token) {
                Err(ErrorCode::TOO_MANY_OPERATIONS) => {
                    tracing::debug!(uid = caller.uid, "backend out of operations");
                    self.operations.prune(caller.uid, forced)?;
                }
                result => return Ok(result?),
            }
        }
    }

    /// Adds the parameters the service supplies on behalf of the caller.
    fn add_required_parameters(
        &self,
        caller: &CallerContext,
        params: &[KeyParameter],
    ) -> KsResult<Vec<KeyParameter>> {
        let mut result: Vec<KeyParameter> = params
            .iter()
            .filter(|p| !matches!(p.tag(), Tag::CreationDateTime | Tag::AttestationApplicationId))
            .cloned()
            .collect();
        result.push(KeyParameter::CreationDateTime(now_ms()));
        if params.has_tag(Tag::AttestationChallenge) {
            let id = self
                .context
                .attestation_ids
                .attestation_application_id(caller.uid)?;
            result.push(KeyParameter::AttestationApplicationId(id));
        }
        Ok(result)
    }

    /// Checks that an auth-bound key can be stored for `caller`.
    fn check_lskf_binding(
        &self,
        caller: &CallerContext,
        target: &KeyTarget,
        params: &[KeyParameter],
        flags: KeyFlags,
    ) -> KsResult<()> {
        if !params.is_auth_bound() {
            return Ok(());
        }
        if flags.contains(KeyFlags::AUTH_BOUND_WITHOUT_CRYPTOGRAPHIC_LSKF_BINDING) {
            return self.context.policy.check_key_permission(
                caller,
                target.context()?,
                KeyPerm::UseNoLskfBinding,
            );
        }
        match target {
            KeyTarget::Alias { .. } => self.context.super_keys.check_unlocked(caller.user_id()),
            KeyTarget::Blob { .. } => Ok(()),
        }
    }

    /// Calls `create` with the attestation key selected for the new key.
    ///
    /// # Returns
    /// * `(KeyCreationResult, Option<Vec<u8>>)` - Result and the chain of the
    ///   attestation key, to append after the new certificate
    fn with_attestation_key(
        &self,
        caller: &CallerContext,
        attestation_key: Option<&KeyDescriptor>,
        params: &[KeyParameter],
        create: impl Fn(Option<&AttestationKey>) -> KmResult<KeyCreationResult>,
    ) -> KsResult<(KeyCreationResult, Option<Vec<u8>>)> {
        if let Some(descriptor) = attestation_key {
            let resolved = self.context.resolve(caller, descriptor, KeyPerm::Use)?;
            let mut loaded = self.load_key(resolved)?;
            let Some(certificate) = loaded.certificate.clone() else {
                tracing::debug!("attestation key has no certificate");
                return Err(Error::invalid_arg());
            };
            let issuer_subject_name = X509::from_der(&certificate)?.subject_name().to_der()?;
            let mut chain = certificate;
            chain.extend(loaded.certificate_chain.iter().flatten());
            let (result, _) = self.upgrade_if_required(&mut loaded, |blob| {
                let key = AttestationKey {
                    key_blob: blob.to_vec(),
                    attest_key_params: Vec::new(),
                    issuer_subject_name: issuer_subject_name.clone(),
                };
                Ok(create(Some(&key))?)
            })?;
            return Ok((result, Some(chain)));
        }

        let asymmetric = params.algorithm().is_some_and(|a| a.is_asymmetric());
        if asymmetric && params.has_tag(Tag::AttestationChallenge) {
            if let Some(rkp) = self
                .context
                .remote_provisioning
                .get_attestation_key(caller, self.security_level)?
            {
                tracing::debug!("using remotely provisioned attestation key");
                let result = create(Some(&rkp.attestation_key))?;
                return Ok((result, Some(rkp.certificate_chain)));
            }
        }
        Ok((create(None)?, None))
    }

    /// Persists a newly created key at `target`.
    fn store_new_key(
        &self,
        caller: &CallerContext,
        target: &KeyTarget,
        creation: KeyCreationResult,
        flags: KeyFlags,
        attestation_chain: Option<Vec<u8>>,
    ) -> KsResult<KeyMetadata> {
        let authorizations: Vec<Authorization> = creation
            .key_characteristics
            .iter()
            .flat_map(|kc| {
                kc.authorizations.iter().map(move |p| Authorization {
                    security_level: kc.security_level,
                    key_parameter: p.clone(),
                })
            })
            .collect();
        let mut certificates = creation.certificate_chain.into_iter();
        let certificate = certificates.next();
        let mut chain: Vec<u8> = certificates.flatten().collect();
        chain.extend(attestation_chain.into_iter().flatten());
        let certificate_chain = (!chain.is_empty()).then_some(chain);

        let (domain, nspace, alias) = match target {
            KeyTarget::Blob { nspace } => {
                return Ok(KeyMetadata {
                    key: KeyDescriptor::blob(*nspace, creation.key_blob),
                    key_security_level: self.security_level,
                    authorizations,
                    certificate,
                    certificate_chain,
                    modification_time_ms: now_ms(),
                })
            }
            KeyTarget::Alias {
                domain,
                nspace,
                alias,
            } => (*domain, *nspace, alias.as_str()),
        };

        let params: Vec<KeyParameter> = authorizations
            .iter()
            .map(|a| a.key_parameter.clone())
            .collect();
        let lskf_bound = params.is_auth_bound()
            && !flags.contains(KeyFlags::AUTH_BOUND_WITHOUT_CRYPTOGRAPHIC_LSKF_BINDING);
        let blob = if lskf_bound {
            match self
                .context
                .super_keys
                .encrypt(caller.user_id(), &creation.key_blob)
            {
                Ok(encrypted) => StoredBlob::SuperEncrypted(encrypted),
                Err(err) => {
                    if let Err(km) = self.device.delete_key(&creation.key_blob) {
                        tracing::debug!(?km, "orphaned blob not deleted");
                    }
                    return Err(err);
                }
            }
        } else {
            StoredBlob::Plain(creation.key_blob)
        };

        let (key_id, replaced) = self.context.db.store_key(
            domain,
            nspace,
            alias,
            NewEntry {
                security_level: Some(self.security_level),
                blob: Some(blob),
                authorizations,
                certificate,
                certificate_chain,
            },
        );
        if let Some(old) = replaced {
            if old.security_level == Some(self.security_level) {
                self.context.delete_entry_blob(self.device.as_ref(), &old);
            }
        }
        Ok(self.context.db.load_by_id(key_id)?.metadata())
    }
}

impl<D: KeyMintDevice> KeyManagement for KeystoreSecurityLevel<D> {
    fn security_level(&self) -> SecurityLevel {
        self.security_level
    }

    fn hardware_info(&self) -> KsResult<KeyMintHardwareInfo> {
        Ok(self.device.get_hardware_info()?)
    }

    #[instrument(skip_all, fields(uid = caller.uid, domain = ?key.domain, forced = forced), err)]
    fn create_operation(
        &self,
        caller: &CallerContext,
        key: &KeyDescriptor,
        operation_parameters: &[KeyParameter],
        forced: bool,
    ) -> KsResult<CreateOperationResponse> {
        let resolved = self.context.resolve(caller, key, KeyPerm::Use)?;
        if forced {
            self.context
                .policy
                .check_key_permission(caller, resolved.context, KeyPerm::ReqForcedOp)?;
        }
        let purpose = operation_parameters
            .purposes()
            .first()
            .copied()
            .ok_or(Error::Km(ErrorCode::INVALID_ARGUMENT))?;
        let mut loaded = self.load_key(resolved)?;

        let (begin_token, pending_auth) = match AuthRequirement::for_key(&loaded.characteristics, 0)
        {
            None => (None, None),
            Some(req @ AuthRequirement::TimeBound { .. }) => {
                match req.find_token(&self.context.tokens) {
                    Some(token) => (Some(token), None),
                    None => (None, Some(req)),
                }
            }
            Some(req) => (None, Some(req)),
        };

        let slot = self.operations.reserve(caller.uid, forced)?;
        let (begin, upgraded_blob) = self.upgrade_if_required(&mut loaded, |blob| {
            self.begin_with_pruning(
                caller,
                forced,
                purpose,
                blob,
                operation_parameters,
                begin_token.as_ref(),
            )
        })?;

        let auth = pending_auth.map(|req| req.with_challenge(begin.challenge));
        let challenge = auth.as_ref().map(|_| begin.challenge);
        let operation = KeystoreOperation::new(NewOperation {
            owner: caller.uid,
            key_id: loaded.key_id,
            purpose,
            aead: operation_parameters.block_mode() == Some(BlockMode::Gcm),
            forced,
            backend: begin.operation,
            auth,
            tokens: self.context.tokens.clone(),
        });
        slot.fill(&operation);
        tracing::debug!(op_id = operation.id(), ?purpose, "operation admitted");

        Ok(CreateOperationResponse {
            operation,
            challenge,
            parameters: (!begin.params.is_empty()).then_some(begin.params),
            upgraded_blob: upgraded_blob.filter(|_| loaded.key_id.is_none()),
        })
    }

    #[instrument(skip_all, fields(uid = caller.uid, domain = ?key.domain), err)]
    fn generate_key(
        &self,
        caller: &CallerContext,
        key: &KeyDescriptor,
        attestation_key: Option<&KeyDescriptor>,
        params: &[KeyParameter],
        flags: i32,
        entropy: &[u8],
    ) -> KsResult<KeyMetadata> {
        let flags = check_key_flags(flags)?;
        let target = self.context.resolve_target(caller, key)?;
        self.check_lskf_binding(caller, &target, params, flags)?;
        let params = self.add_required_parameters(caller, params)?;
        if !entropy.is_empty() {
            self.device.add_rng_entropy(entropy)?;
        }
        let (creation, attestation_chain) =
            self.with_attestation_key(caller, attestation_key, &params, |attest| {
                self.device.generate_key(&params, attest)
            })?;
        let metadata = self.store_new_key(caller, &target, creation, flags, attestation_chain)?;
        tracing::debug!(key = ?metadata.key.domain, "key generated");
        Ok(metadata)
    }

    #[instrument(skip_all, fields(uid = caller.uid, domain = ?key.domain), err)]
    fn import_key(
        &self,
        caller: &CallerContext,
        key: &KeyDescriptor,
        attestation_key: Option<&KeyDescriptor>,
        params: &[KeyParameter],
        flags: i32,
        key_data: &[u8],
    ) -> KsResult<KeyMetadata> {
        let flags = check_key_flags(flags)?;
        let target = self.context.resolve_target(caller, key)?;
        self.check_lskf_binding(caller, &target, params, flags)?;
        let format = match params.algorithm() {
            Some(algorithm) if algorithm.is_asymmetric() => KeyFormat::Pkcs8,
            Some(_) => KeyFormat::Raw,
            None => return Err(Error::Km(ErrorCode::INVALID_ARGUMENT)),
        };
        let params = self.add_required_parameters(caller, params)?;
        let (creation, attestation_chain) =
            self.with_attestation_key(caller, attestation_key, &params, |attest| {
                self.device.import_key(&params, format, key_data, attest)
            })?;
        self.store_new_key(caller, &target, creation, flags, attestation_chain)
    }

    #[instrument(skip_all, fields(uid = caller.uid, domain = ?key.domain), err)]
    fn import_wrapped_key(
        &self,
        caller: &CallerContext,
        key: &KeyDescriptor,
        wrapping_key: &KeyDescriptor,
        masking_key: Option<&[u8]>,
        params: &[KeyParameter],
        authenticators: &[AuthenticatorSpec],
    ) -> KsResult<KeyMetadata> {
        if key.domain == Domain::Blob {
            return Err(Error::invalid_arg());
        }
        let Some(wrapped_data) = key.blob.as_deref() else {
            tracing::debug!("wrapped key data missing");
            return Err(Error::invalid_arg());
        };
        if masking_key.is_some() {
            return Err(Error::invalid_arg());
        }
        let target = self.context.resolve_target(caller, key)?;
        let resolved = self.context.resolve(caller, wrapping_key, KeyPerm::Use)?;
        let mut wrapping = self.load_key(resolved)?;

        let sid_of = |ty: AuthenticatorType| {
            authenticators
                .iter()
                .find(|a| a.authenticator_type == ty)
                .map_or(NO_SID, |a| a.authenticator_id)
        };
        let password_sid = sid_of(AuthenticatorType::Password);
        let biometric_sid = sid_of(AuthenticatorType::Fingerprint);

        let (creation, _) = self.upgrade_if_required(&mut wrapping, |blob| {
            Ok(self.device.import_wrapped_key(
                wrapped_data,
                blob,
                &ZERO_MASKING_KEY,
                params,
                password_sid,
                biometric_sid,
            )?)
        })?;
        self.store_new_key(caller, &target, creation, KeyFlags::empty(), None)
    }

    #[instrument(skip_all, fields(uid = caller.uid), err)]
    fn convert_storage_key_to_ephemeral(
        &self,
        caller: &CallerContext,
        storage_key: &KeyDescriptor,
    ) -> KsResult<EphemeralStorageKeyResponse> {
        if storage_key.domain != Domain::Blob {
            return Err(Error::invalid_arg());
        }
        let KeyRef::Blob { nspace, blob } = storage_key.key_ref(caller)? else {
            return Err(Error::invalid_arg());
        };
        let context = KeyContext::Selinux(nspace);
        self.context
            .policy
            .check_key_permission(caller, context, KeyPerm::ConvertStorageKeyToEphemeral)
            .or_else(|_| {
                self.context
                    .policy
                    .check_key_permission(caller, context, KeyPerm::ManageBlob)
            })?;

        let mut loaded = LoadedKey::transient(blob.to_vec());
        let (ephemeral_key, upgraded_blob) = self.upgrade_if_required(&mut loaded, |blob| {
            Ok(self.device.convert_storage_key_to_ephemeral(blob)?)
        })?;
        Ok(EphemeralStorageKeyResponse {
            ephemeral_key,
            upgraded_blob,
        })
    }

    #[instrument(skip_all, fields(uid = caller.uid), err)]
    fn delete_key(&self, caller: &CallerContext, key: &KeyDescriptor) -> KsResult<()> {
        if key.domain != Domain::Blob {
            return Err(Error::invalid_arg());
        }
        let resolved = self.context.resolve(caller, key, KeyPerm::Delete)?;
        let KeyIdentity::Transient(blob) = resolved.identity else {
            return Err(Error::sys());
        };
        self.device.delete_key(&blob)?;
        Ok(())
    }
}
