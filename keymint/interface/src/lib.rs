// Copyright (C) Microsoft Corporation. All rights reserved.

#![warn(missing_docs)]

//! KeyMint backend interface.
//!
//! The keystore service talks to secure hardware only through the
//! [`KeyMintDevice`] and [`KeyMintOperation`] traits defined here. A backend
//! produces opaque key blobs and never sees key descriptors, aliases or
//! caller identities.

mod error;
mod params;

pub use error::ErrorCode;
pub use params::*;
use serde::Deserialize;
use serde::Serialize;

/// KeyMint Result
pub type KmResult<T> = Result<T, ErrorCode>;

/// Sentinel for an absent secure user id.
pub const NO_SID: i64 = -1;

/// Maximum number of bytes accepted by [`KeyMintDevice::add_rng_entropy`].
pub const MAX_ENTROPY_LEN: usize = 2048;

/// Backend identification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMintHardwareInfo {
    /// Interface version implemented by the backend
    pub version_number: i32,

    /// Security level of the backend
    pub security_level: SecurityLevel,

    /// Implementation name
    pub keymint_name: String,

    /// Implementation author
    pub keymint_author_name: String,
}

/// Authorizations enforced at a given security level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCharacteristics {
    /// Where the authorizations are enforced
    pub security_level: SecurityLevel,

    /// Enforced authorizations
    pub authorizations: Vec<KeyParameter>,
}

/// Output of key generation or import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCreationResult {
    /// Opaque key blob
    pub key_blob: Vec<u8>,

    /// Characteristics grouped by security level
    pub key_characteristics: Vec<KeyCharacteristics>,

    /// DER certificates, leaf first. Empty for symmetric keys.
    pub certificate_chain: Vec<Vec<u8>>,
}

/// Key used to sign the certificate of a newly created asymmetric key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationKey {
    /// Blob of the attestation key
    pub key_blob: Vec<u8>,

    /// Extra parameters for the attestation key
    pub attest_key_params: Vec<KeyParameter>,

    /// DER subject of the attestation key certificate, used as issuer
    pub issuer_subject_name: Vec<u8>,
}

/// Proof of recent user authentication.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HardwareAuthToken {
    /// Operation challenge, or 0 for a time-based token
    pub challenge: i64,

    /// Secure user id of the authenticated user
    pub user_id: i64,

    /// Authenticator specific id (e.g. biometric enrollment)
    pub authenticator_id: i64,

    /// Authenticator that produced the token
    pub authenticator_type: HardwareAuthenticatorType,

    /// Milliseconds since boot when the token was issued
    pub timestamp_ms: i64,

    /// MAC over the token
    pub mac: Vec<u8>,
}

/// Output of [`KeyMintDevice::begin`].
pub struct BeginResult {
    /// Challenge the auth subsystem must embed in a per-operation token
    pub challenge: i64,

    /// Parameters produced by the backend (e.g. a generated nonce)
    pub params: Vec<KeyParameter>,

    /// Backend operation
    pub operation: Box<dyn KeyMintOperation>,
}

impl std::fmt::Debug for BeginResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeginResult")
            .field("challenge", &self.challenge)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// KeyMint device
pub trait KeyMintDevice: Send + Sync {
    /// Returns the backend identification.
    fn get_hardware_info(&self) -> KmResult<KeyMintHardwareInfo>;

    /// Mixes caller supplied entropy into the backend RNG.
    ///
    /// # Arguments
    /// * `data` - Entropy, at most [`MAX_ENTROPY_LEN`] bytes
    ///
    /// # Error
    /// * `ErrorCode::INVALID_INPUT_LENGTH` - Too much entropy
    fn add_rng_entropy(&self, data: &[u8]) -> KmResult<()>;

    /// Generates a new key.
    ///
    /// # Arguments
    /// * `params` - Requested key characteristics
    /// * `attestation_key` - Key that signs the new certificate, if any
    ///
    /// # Returns
    /// * `KeyCreationResult` - Blob, characteristics and certificates
    fn generate_key(
        &self,
        params: &[KeyParameter],
        attestation_key: Option<&AttestationKey>,
    ) -> KmResult<KeyCreationResult>;

    /// Imports clear key material.
    ///
    /// # Arguments
    /// * `params` - Requested key characteristics
    /// * `format` - `Raw` for symmetric keys, `Pkcs8` for asymmetric keys
    /// * `key_data` - Key material
    /// * `attestation_key` - Key that signs the new certificate, if any
    fn import_key(
        &self,
        params: &[KeyParameter],
        format: KeyFormat,
        key_data: &[u8],
        attestation_key: Option<&AttestationKey>,
    ) -> KmResult<KeyCreationResult>;

    /// Imports a key wrapped for this device.
    ///
    /// # Arguments
    /// * `wrapped_key_data` - Wrapped key record
    /// * `wrapping_key_blob` - Blob of the RSA key that unwraps the record
    /// * `masking_key` - Mask applied to the transport key
    /// * `unwrapping_params` - Parameters for the unwrapping operation
    /// * `password_sid` - Secure id of the password authenticator or [`NO_SID`]
    /// * `biometric_sid` - Secure id of the biometric authenticator or [`NO_SID`]
    fn import_wrapped_key(
        &self,
        wrapped_key_data: &[u8],
        wrapping_key_blob: &[u8],
        masking_key: &[u8],
        unwrapping_params: &[KeyParameter],
        password_sid: i64,
        biometric_sid: i64,
    ) -> KmResult<KeyCreationResult>;

    /// Re-encrypts a blob at the current system version.
    fn upgrade_key(&self, key_blob: &[u8], upgrade_params: &[KeyParameter])
        -> KmResult<Vec<u8>>;

    /// Invalidates a blob.
    fn delete_key(&self, key_blob: &[u8]) -> KmResult<()>;

    /// Returns the characteristics sealed into a blob. Blobs awaiting an
    /// upgrade still report theirs.
    ///
    /// # Error
    /// * `ErrorCode::INVALID_KEY_BLOB` - The blob is corrupt, foreign or deleted
    fn get_key_characteristics(&self, key_blob: &[u8]) -> KmResult<Vec<KeyCharacteristics>>;

    /// Starts a cryptographic operation.
    ///
    /// # Arguments
    /// * `purpose` - Operation purpose
    /// * `key_blob` - Key to use
    /// * `params` - Operation parameters
    /// * `auth_token` - Token authorizing an auth-bound key, if available
    ///
    /// # Error
    /// * `ErrorCode::TOO_MANY_OPERATIONS` - The backend has no free slot
    /// * `ErrorCode::KEY_REQUIRES_UPGRADE` - The blob must be upgraded first
    fn begin(
        &self,
        purpose: KeyPurpose,
        key_blob: &[u8],
        params: &[KeyParameter],
        auth_token: Option<&HardwareAuthToken>,
    ) -> KmResult<BeginResult>;

    /// Converts a storage key blob into a per-boot ephemeral key.
    fn convert_storage_key_to_ephemeral(&self, storage_key_blob: &[u8]) -> KmResult<Vec<u8>>;
}

/// A live backend operation.
///
/// Every error returned by an operation method ends the operation inside the
/// backend; the caller must not use it again.
pub trait KeyMintOperation: Send {
    /// Supplies associated data to an AEAD operation.
    fn update_aad(&mut self, aad: &[u8], auth_token: Option<&HardwareAuthToken>) -> KmResult<()>;

    /// Processes input, returning any output produced so far.
    fn update(&mut self, input: &[u8], auth_token: Option<&HardwareAuthToken>)
        -> KmResult<Vec<u8>>;

    /// Processes final input and ends the operation.
    ///
    /// # Arguments
    /// * `input` - Final input, if any
    /// * `signature` - Signature or MAC to verify, if the purpose is `Verify`
    /// * `auth_token` - Token authorizing an auth-bound key, if available
    fn finish(
        &mut self,
        input: Option<&[u8]>,
        signature: Option<&[u8]>,
        auth_token: Option<&HardwareAuthToken>,
    ) -> KmResult<Vec<u8>>;

    /// Ends the operation without producing output.
    fn abort(&mut self) -> KmResult<()>;
}
