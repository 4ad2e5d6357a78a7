// Copyright (C) Microsoft Corporation. All rights reserved.

//! Software KeyMint device.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use ks2_keymint_interface::*;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::Signer;
use parking_lot::RwLock;
use serde::Deserialize;
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::blob::*;
use crate::cert::make_certificate;
use crate::cert::CertSigner;
use crate::error::OsslResultExt;
use crate::keys::levels_to_params;
use crate::keys::private_key;
use crate::keys::KeyFactory;
use crate::keys::NewKey;
use crate::operation::SlotGuard;
use crate::operation::SoftOperation;
use crate::patch_level::PatchLevels;
use crate::rng::EntropyPool;
use crate::wrap::bind_secure_ids;
use crate::wrap::unwrap_key;
use crate::wrap::WrappedKey;

const KEYMINT_VERSION: i32 = 3;
const ROOT_KEY_LEN: usize = 32;

/// Software device configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Reported security level
    pub security_level: SecurityLevel,

    /// Concurrent operation limit; unlimited if `None`
    pub max_operations: Option<usize>,

    /// Reported OS version
    pub os_version: u32,

    /// Patch levels stamped into new keys
    pub patch_levels: PatchLevels,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            security_level: SecurityLevel::TrustedEnvironment,
            max_operations: None,
            os_version: 140000,
            patch_levels: PatchLevels::default(),
        }
    }
}

/// Software KeyMint device.
///
/// Blobs are sealed under a root key that lives as long as the device
/// object; blobs from another instance are rejected as invalid.
#[derive(Clone)]
pub struct SoftKeyMint {
    inner: Arc<RwLock<SoftKeyMintInner>>,
    rng: Arc<EntropyPool>,
    live_ops: Arc<AtomicUsize>,
}

struct SoftKeyMintInner {
    config: SimConfig,
    root_key: Zeroizing<Vec<u8>>,
    boot_secret: Zeroizing<Vec<u8>>,
    revoked: HashSet<Uuid>,
}

impl SoftKeyMint {
    /// Creates a device with fresh root and per-boot secrets.
    pub fn new(config: SimConfig) -> KmResult<Self> {
        let rng = EntropyPool::new();
        let root_key = Zeroizing::new(rng.bytes(ROOT_KEY_LEN)?);
        let boot_secret = Zeroizing::new(rng.bytes(ROOT_KEY_LEN)?);
        tracing::debug!(security_level = ?config.security_level, "soft keymint created");
        Ok(Self {
            inner: Arc::new(RwLock::new(SoftKeyMintInner {
                config,
                root_key,
                boot_secret,
                revoked: HashSet::new(),
            })),
            rng: Arc::new(rng),
            live_ops: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Applies a system update: keys sealed at older levels now require
    /// an upgrade.
    pub fn set_patch_levels(&self, levels: PatchLevels) {
        tracing::debug!(?levels, "patch levels updated");
        self.inner.write().config.patch_levels = levels;
    }

    /// Number of live backend operations.
    pub fn live_operations(&self) -> usize {
        self.live_ops.load(Ordering::Acquire)
    }

    fn factory(&self, inner: &SoftKeyMintInner) -> KeyFactory<'_> {
        KeyFactory {
            rng: &self.rng,
            os_version: inner.config.os_version,
            levels: inner.config.patch_levels,
        }
    }

    fn seal(&self, inner: &SoftKeyMintInner, contents: &BlobContents) -> KmResult<Vec<u8>> {
        seal(&inner.root_key, &self.rng, contents)
    }

    /// Unseals a blob that must be current and not deleted.
    fn load(&self, inner: &SoftKeyMintInner, blob: &[u8]) -> KmResult<BlobContents> {
        let contents = unseal(&inner.root_key, blob)?;
        if inner.revoked.contains(&contents.id) {
            return Err(ErrorCode::INVALID_KEY_BLOB);
        }
        match contents.levels.compare(&inner.config.patch_levels) {
            Some(CmpOrdering::Equal) => Ok(contents),
            Some(CmpOrdering::Less) => Err(ErrorCode::KEY_REQUIRES_UPGRADE),
            _ => Err(ErrorCode::INVALID_KEY_BLOB),
        }
    }

    /// Seals a new key and builds its certificate chain.
    fn finish_key(
        &self,
        inner: &SoftKeyMintInner,
        key: NewKey,
        params: &[KeyParameter],
        attestation_key: Option<&AttestationKey>,
    ) -> KmResult<KeyCreationResult> {
        let certificate_chain = match &key.material {
            KeyMaterial::Ec(_) | KeyMaterial::Rsa(_) => {
                let pkey = private_key(&key.material)?;
                let cert = match attestation_key {
                    Some(attest) => {
                        let attest_contents = self.load(inner, &attest.key_blob)?;
                        if !attest_contents
                            .characteristics
                            .purposes()
                            .contains(&KeyPurpose::AttestKey)
                        {
                            return Err(ErrorCode::INCOMPATIBLE_PURPOSE);
                        }
                        let attest_pkey = private_key(&attest_contents.material)?;
                        make_certificate(
                            &pkey,
                            params,
                            CertSigner::AttestKey {
                                key: &attest_pkey,
                                issuer: &attest.issuer_subject_name,
                            },
                        )?
                    }
                    None => make_certificate(&pkey, params, CertSigner::SelfSigned)?,
                };
                vec![cert]
            }
            _ => Vec::new(),
        };

        let contents = BlobContents {
            id: Uuid::new_v4(),
            levels: inner.config.patch_levels,
            characteristics: key.characteristics,
            material: key.material,
        };
        let key_blob = self.seal(inner, &contents)?;
        tracing::debug!(id = %contents.id, "key sealed");
        Ok(KeyCreationResult {
            key_blob,
            key_characteristics: vec![KeyCharacteristics {
                security_level: inner.config.security_level,
                authorizations: contents.characteristics.clone(),
            }],
            certificate_chain,
        })
    }
}

fn check_attestation_params(params: &[KeyParameter]) -> KmResult<()> {
    if params.has_tag(Tag::AttestationChallenge) && !params.has_tag(Tag::AttestationApplicationId)
    {
        return Err(ErrorCode::ATTESTATION_APPLICATION_ID_MISSING);
    }
    Ok(())
}

impl KeyMintDevice for SoftKeyMint {
    fn get_hardware_info(&self) -> KmResult<KeyMintHardwareInfo> {
        Ok(KeyMintHardwareInfo {
            version_number: KEYMINT_VERSION,
            security_level: self.inner.read().config.security_level,
            keymint_name: "SoftKeyMint".to_string(),
            keymint_author_name: "ks2".to_string(),
        })
    }

    fn add_rng_entropy(&self, data: &[u8]) -> KmResult<()> {
        self.rng.add_entropy(data)
    }

    #[instrument(skip_all, err)]
    fn generate_key(
        &self,
        params: &[KeyParameter],
        attestation_key: Option<&AttestationKey>,
    ) -> KmResult<KeyCreationResult> {
        check_attestation_params(params)?;
        let inner = self.inner.read();
        let key = self.factory(&inner).generate(params)?;
        self.finish_key(&inner, key, params, attestation_key)
    }

    #[instrument(skip_all, fields(format = ?format), err)]
    fn import_key(
        &self,
        params: &[KeyParameter],
        format: KeyFormat,
        key_data: &[u8],
        attestation_key: Option<&AttestationKey>,
    ) -> KmResult<KeyCreationResult> {
        check_attestation_params(params)?;
        let inner = self.inner.read();
        let key = self
            .factory(&inner)
            .import(params, format, key_data, KeyOrigin::Imported)?;
        self.finish_key(&inner, key, params, attestation_key)
    }

    #[instrument(skip_all, fields(password_sid = password_sid, biometric_sid = biometric_sid), err)]
    fn import_wrapped_key(
        &self,
        wrapped_key_data: &[u8],
        wrapping_key_blob: &[u8],
        masking_key: &[u8],
        unwrapping_params: &[KeyParameter],
        password_sid: i64,
        biometric_sid: i64,
    ) -> KmResult<KeyCreationResult> {
        let wrapped = WrappedKey::from_bytes(wrapped_key_data)?;
        let inner = self.inner.read();
        let wrapping = self.load(&inner, wrapping_key_blob)?;
        if !matches!(wrapping.material, KeyMaterial::Rsa(_))
            || !wrapping
                .characteristics
                .purposes()
                .contains(&KeyPurpose::WrapKey)
        {
            return Err(ErrorCode::INCOMPATIBLE_PURPOSE);
        }
        if unwrapping_params
            .padding()
            .is_some_and(|p| p != PaddingMode::RsaOaep)
        {
            return Err(ErrorCode::INCOMPATIBLE_PADDING_MODE);
        }

        let wrapping_pkey = private_key(&wrapping.material)?;
        let (description, key_data) = unwrap_key(&wrapping_pkey, masking_key, &wrapped)?;
        let params = bind_secure_ids(&description.key_params, password_sid, biometric_sid)?;
        let key = self.factory(&inner).import(
            &params,
            description.key_format,
            &key_data,
            KeyOrigin::SecurelyImported,
        )?;
        self.finish_key(&inner, key, &params, None)
    }

    #[instrument(skip_all, err)]
    fn upgrade_key(
        &self,
        key_blob: &[u8],
        _upgrade_params: &[KeyParameter],
    ) -> KmResult<Vec<u8>> {
        let inner = self.inner.read();
        let mut contents = unseal(&inner.root_key, key_blob)?;
        if inner.revoked.contains(&contents.id) {
            return Err(ErrorCode::INVALID_KEY_BLOB);
        }
        match contents.levels.compare(&inner.config.patch_levels) {
            Some(CmpOrdering::Equal) => return Ok(Vec::new()),
            Some(CmpOrdering::Less) => {}
            _ => return Err(ErrorCode::INVALID_KEY_BLOB),
        }

        let levels = inner.config.patch_levels;
        contents.characteristics.retain(|p| {
            !matches!(
                p.tag(),
                Tag::OsPatchLevel | Tag::VendorPatchLevel | Tag::BootPatchLevel
            )
        });
        contents.characteristics.extend(levels_to_params(&levels));
        contents.levels = levels;
        tracing::debug!(id = %contents.id, ?levels, "key upgraded");
        self.seal(&inner, &contents)
    }

    #[instrument(skip_all, err)]
    fn delete_key(&self, key_blob: &[u8]) -> KmResult<()> {
        let mut inner = self.inner.write();
        let contents = unseal(&inner.root_key, key_blob)?;
        tracing::debug!(id = %contents.id, "key revoked");
        inner.revoked.insert(contents.id);
        Ok(())
    }

    fn get_key_characteristics(&self, key_blob: &[u8]) -> KmResult<Vec<KeyCharacteristics>> {
        let inner = self.inner.read();
        let contents = unseal(&inner.root_key, key_blob)?;
        if inner.revoked.contains(&contents.id) {
            return Err(ErrorCode::INVALID_KEY_BLOB);
        }
        Ok(vec![KeyCharacteristics {
            security_level: inner.config.security_level,
            authorizations: contents.characteristics.clone(),
        }])
    }

    #[instrument(skip_all, fields(purpose = ?purpose), err)]
    fn begin(
        &self,
        purpose: KeyPurpose,
        key_blob: &[u8],
        params: &[KeyParameter],
        auth_token: Option<&HardwareAuthToken>,
    ) -> KmResult<BeginResult> {
        let inner = self.inner.read();
        let contents = self.load(&inner, key_blob)?;
        let slot = SlotGuard::acquire(&self.live_ops, inner.config.max_operations)?;
        let challenge = self.rng.nonzero_i64()?;
        let (operation, out_params) = SoftOperation::begin(
            purpose,
            &contents,
            params,
            auth_token,
            challenge,
            slot,
            &self.rng,
        )?;
        Ok(BeginResult {
            challenge,
            params: out_params,
            operation: Box::new(operation),
        })
    }

    #[instrument(skip_all, err)]
    fn convert_storage_key_to_ephemeral(&self, storage_key_blob: &[u8]) -> KmResult<Vec<u8>> {
        let inner = self.inner.read();
        let contents = self.load(&inner, storage_key_blob)?;
        let KeyMaterial::Aes(key) = &contents.material else {
            return Err(ErrorCode::INVALID_ARGUMENT);
        };
        if !contents.characteristics.has_tag(Tag::StorageKey) {
            return Err(ErrorCode::INVALID_ARGUMENT);
        }
        let secret = PKey::hmac(&inner.boot_secret).or_unknown()?;
        let mut signer = Signer::new(MessageDigest::sha256(), &secret).or_unknown()?;
        signer.update(contents.id.as_bytes()).or_unknown()?;
        signer.update(key).or_unknown()?;
        signer.sign_to_vec().or_unknown()
    }
}
