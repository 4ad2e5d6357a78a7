// Copyright (C) Microsoft Corporation. All rights reserved.

//! Request and response records of the client surface.

use std::sync::Arc;

use ks2_keymint_interface::HardwareAuthenticatorType;
use ks2_keymint_interface::KeyParameter;
use ks2_keymint_interface::SecurityLevel;

use crate::descriptor::KeyDescriptor;
use crate::operation::KeystoreOperation;
use crate::security_level::KeyManagement;

/// A key parameter together with where it is enforced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    /// Enforcing security level
    pub security_level: SecurityLevel,

    /// Parameter
    pub key_parameter: KeyParameter,
}

/// Description of a key returned by lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMetadata {
    /// Address of the key. A `KEY_ID` descriptor for stored keys, a `BLOB`
    /// descriptor carrying the new blob otherwise.
    pub key: KeyDescriptor,

    /// Backend that holds the key
    pub key_security_level: SecurityLevel,

    /// Key characteristics
    pub authorizations: Vec<Authorization>,

    /// DER leaf certificate
    pub certificate: Option<Vec<u8>>,

    /// Concatenated DER certificates above the leaf
    pub certificate_chain: Option<Vec<u8>>,

    /// Milliseconds since the epoch of the last change
    pub modification_time_ms: i64,
}

/// Kind of authenticator in an [`AuthenticatorSpec`].
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthenticatorType {
    /// Not specified
    Unspecified = 0,

    /// No authenticator
    None = 1,

    /// Lock screen password
    Password = 2,

    /// Fingerprint
    Fingerprint = 3,

    /// Any authenticator
    Any = 5,
}

impl From<AuthenticatorType> for HardwareAuthenticatorType {
    fn from(value: AuthenticatorType) -> Self {
        match value {
            AuthenticatorType::Unspecified | AuthenticatorType::None => {
                HardwareAuthenticatorType::NONE
            }
            AuthenticatorType::Password => HardwareAuthenticatorType::PASSWORD,
            AuthenticatorType::Fingerprint => HardwareAuthenticatorType::FINGERPRINT,
            AuthenticatorType::Any => HardwareAuthenticatorType::ANY,
        }
    }
}

/// A candidate authenticator for wrapped key import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatorSpec {
    /// Authenticator kind
    pub authenticator_type: AuthenticatorType,

    /// Secure user id of the authenticator
    pub authenticator_id: i64,
}

/// Result of `create_operation`.
#[derive(Debug)]
pub struct CreateOperationResponse {
    /// Operation handle; dropping every clone aborts the operation
    pub operation: Arc<KeystoreOperation>,

    /// Set when a user auth token for this challenge is required
    pub challenge: Option<i64>,

    /// Parameters produced by the backend, such as a generated nonce
    pub parameters: Option<Vec<KeyParameter>>,

    /// Replacement blob if a `BLOB` key was upgraded at begin
    pub upgraded_blob: Option<Vec<u8>>,
}

/// Result of `convert_storage_key_to_ephemeral`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralStorageKeyResponse {
    /// Per-boot ephemeral key
    pub ephemeral_key: Vec<u8>,

    /// Replacement storage key if the input was upgraded
    pub upgraded_blob: Option<Vec<u8>>,
}

/// Result of `get_key_entry`.
pub struct KeyEntryResponse {
    /// Security level holding the key; `None` for certificate-only entries
    pub security_level: Option<Arc<dyn KeyManagement>>,

    /// Key metadata
    pub metadata: KeyMetadata,
}

impl std::fmt::Debug for KeyEntryResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyEntryResponse")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}
