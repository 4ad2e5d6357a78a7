// Copyright (C) Microsoft Corporation. All rights reserved.

//! Secure key import.
//!
//! A wrapped key is a JSON [`WrappedKey`] record. The transport key is an
//! AES-256 key, XORed with the masking key and encrypted to the wrapping key
//! with RSA-OAEP (SHA-256). The key material is encrypted with AES-256-GCM
//! under the transport key, authenticating the key description.

use ks2_keymint_interface::ErrorCode;
use ks2_keymint_interface::HardwareAuthenticatorType;
use ks2_keymint_interface::KeyFormat;
use ks2_keymint_interface::KeyParameter;
use ks2_keymint_interface::KeyParameterSet;
use ks2_keymint_interface::KmResult;
use ks2_keymint_interface::NO_SID;
use openssl::encrypt::Decrypter;
use openssl::encrypt::Encrypter;
use openssl::hash::MessageDigest;
use openssl::pkey::HasPrivate;
use openssl::pkey::HasPublic;
use openssl::pkey::PKey;
use openssl::pkey::PKeyRef;
use openssl::rsa::Padding;
use openssl::symm::decrypt_aead;
use openssl::symm::encrypt_aead;
use openssl::symm::Cipher;
use serde::Deserialize;
use serde::Serialize;
use zeroize::Zeroizing;

use crate::error::OsslResultExt;

/// Current wrapped key record version.
pub const WRAPPED_KEY_VERSION: u32 = 1;

/// Length of the transport and masking keys.
pub const TRANSPORT_KEY_LEN: usize = 32;

const GCM_IV_LEN: usize = 12;
const GCM_TAG_LEN: usize = 16;

/// Description of the wrapped key, authenticated by the GCM tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDescription {
    /// Format of the key material
    pub key_format: KeyFormat,

    /// Characteristics of the imported key
    pub key_params: Vec<KeyParameter>,
}

/// Wrapped key record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    /// Record version
    pub version: u32,

    /// RSA-OAEP encrypted, masked transport key
    pub encrypted_transport_key: Vec<u8>,

    /// GCM nonce
    pub iv: Vec<u8>,

    /// Authenticated key description
    pub description: KeyDescription,

    /// Encrypted key material
    pub encrypted_key: Vec<u8>,

    /// GCM tag
    pub tag: Vec<u8>,
}

impl WrappedKey {
    /// Serializes the record.
    pub fn to_bytes(&self) -> KmResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|_| ErrorCode::UNKNOWN_ERROR)
    }

    /// Parses a record.
    pub fn from_bytes(data: &[u8]) -> KmResult<Self> {
        let wrapped: WrappedKey =
            serde_json::from_slice(data).map_err(|_| ErrorCode::INVALID_ARGUMENT)?;
        if wrapped.version != WRAPPED_KEY_VERSION {
            return Err(ErrorCode::INVALID_ARGUMENT);
        }
        Ok(wrapped)
    }
}

fn description_aad(description: &KeyDescription) -> KmResult<Vec<u8>> {
    serde_json::to_vec(description).map_err(|_| ErrorCode::UNKNOWN_ERROR)
}

fn xor_mask(key: &mut [u8], mask: &[u8]) {
    for (k, m) in key.iter_mut().zip(mask.iter()) {
        *k ^= m;
    }
}

/// Wraps `key_data` for the holder of `wrapping_key`.
///
/// # Arguments
/// * `wrapping_key` - Public half of the device RSA wrapping key
/// * `masking_key` - 32 byte mask applied to the transport key
/// * `description` - Format and characteristics of the key
/// * `key_data` - Key material in `description.key_format`
pub fn wrap_key<T: HasPublic>(
    wrapping_key: &PKeyRef<T>,
    masking_key: &[u8],
    description: KeyDescription,
    key_data: &[u8],
) -> KmResult<Vec<u8>> {
    if masking_key.len() != TRANSPORT_KEY_LEN {
        return Err(ErrorCode::INVALID_ARGUMENT);
    }
    let mut transport = Zeroizing::new(vec![0u8; TRANSPORT_KEY_LEN]);
    openssl::rand::rand_bytes(&mut transport).or_unknown()?;
    let mut iv = vec![0u8; GCM_IV_LEN];
    openssl::rand::rand_bytes(&mut iv).or_unknown()?;

    let aad = description_aad(&description)?;
    let mut tag = vec![0u8; GCM_TAG_LEN];
    let encrypted_key = encrypt_aead(
        Cipher::aes_256_gcm(),
        &transport,
        Some(&iv),
        &aad,
        key_data,
        &mut tag,
    )
    .or_unknown()?;

    let mut masked = transport.clone();
    xor_mask(&mut masked, masking_key);
    let mut encrypter = Encrypter::new(wrapping_key).or_unknown()?;
    encrypter.set_rsa_padding(Padding::PKCS1_OAEP).or_unknown()?;
    encrypter.set_rsa_oaep_md(MessageDigest::sha256()).or_unknown()?;
    encrypter.set_rsa_mgf1_md(MessageDigest::sha256()).or_unknown()?;
    let len = encrypter.encrypt_len(&masked).or_unknown()?;
    let mut encrypted_transport_key = vec![0u8; len];
    let n = encrypter
        .encrypt(&masked, &mut encrypted_transport_key)
        .or_unknown()?;
    encrypted_transport_key.truncate(n);

    WrappedKey {
        version: WRAPPED_KEY_VERSION,
        encrypted_transport_key,
        iv,
        description,
        encrypted_key,
        tag,
    }
    .to_bytes()
}

/// Recovers the key description and key material.
pub(crate) fn unwrap_key<T: HasPrivate>(
    wrapping_key: &PKeyRef<T>,
    masking_key: &[u8],
    wrapped: &WrappedKey,
) -> KmResult<(KeyDescription, Zeroizing<Vec<u8>>)> {
    if masking_key.len() != TRANSPORT_KEY_LEN {
        return Err(ErrorCode::INVALID_ARGUMENT);
    }
    let mut decrypter = Decrypter::new(wrapping_key).or_unknown()?;
    decrypter.set_rsa_padding(Padding::PKCS1_OAEP).or_unknown()?;
    decrypter.set_rsa_oaep_md(MessageDigest::sha256()).or_unknown()?;
    decrypter.set_rsa_mgf1_md(MessageDigest::sha256()).or_unknown()?;
    let len = decrypter
        .decrypt_len(&wrapped.encrypted_transport_key)
        .or_unknown()?;
    let mut transport = Zeroizing::new(vec![0u8; len]);
    let n = decrypter
        .decrypt(&wrapped.encrypted_transport_key, &mut transport)
        .or_km(ErrorCode::IMPORTED_KEY_DECRYPTION_FAILED)?;
    transport.truncate(n);
    if transport.len() != TRANSPORT_KEY_LEN {
        return Err(ErrorCode::IMPORTED_KEY_DECRYPTION_FAILED);
    }
    xor_mask(&mut transport, masking_key);

    let aad = description_aad(&wrapped.description)?;
    let key_data = decrypt_aead(
        Cipher::aes_256_gcm(),
        &transport,
        Some(&wrapped.iv),
        &aad,
        &wrapped.encrypted_key,
        &wrapped.tag,
    )
    .or_km(ErrorCode::VERIFICATION_FAILED)?;
    Ok((wrapped.description.clone(), Zeroizing::new(key_data)))
}

/// Replaces placeholder secure ids with the device authenticator ids.
///
/// A key bound to the password authenticator (alone or together with the
/// biometric one) takes `password_sid`; a biometric-only key takes
/// `biometric_sid`.
///
/// # Error
/// * `ErrorCode::INVALID_USER_ID` - The required authenticator id is absent
pub(crate) fn bind_secure_ids(
    params: &[KeyParameter],
    password_sid: i64,
    biometric_sid: i64,
) -> KmResult<Vec<KeyParameter>> {
    if params.user_secure_ids().is_empty() {
        return Ok(params.to_vec());
    }
    let auth_type = params
        .user_auth_type()
        .unwrap_or(HardwareAuthenticatorType::NONE);
    let sid = if auth_type.intersects(HardwareAuthenticatorType::PASSWORD) {
        password_sid
    } else if auth_type.intersects(HardwareAuthenticatorType::FINGERPRINT) {
        biometric_sid
    } else {
        return Err(ErrorCode::INVALID_ARGUMENT);
    };
    if sid == NO_SID {
        return Err(ErrorCode::INVALID_USER_ID);
    }

    let mut bound: Vec<KeyParameter> = params
        .iter()
        .filter(|p| !matches!(p, KeyParameter::UserSecureId(_)))
        .cloned()
        .collect();
    bound.push(KeyParameter::UserSecureId(sid));
    Ok(bound)
}

/// Extracts the public key from a DER certificate.
pub fn public_key_from_certificate(cert_der: &[u8]) -> KmResult<PKey<openssl::pkey::Public>> {
    openssl::x509::X509::from_der(cert_der)
        .and_then(|cert| cert.public_key())
        .or_km(ErrorCode::INVALID_ARGUMENT)
}

#[cfg(test)]
mod tests {
    use ks2_keymint_interface::Algorithm;
    use openssl::rsa::Rsa;
    use test_with_tracing::test;

    use super::*;

    fn description() -> KeyDescription {
        KeyDescription {
            key_format: KeyFormat::Raw,
            key_params: vec![
                KeyParameter::Algorithm(Algorithm::Aes),
                KeyParameter::KeySize(128),
            ],
        }
    }

    #[test]
    fn test_wrap_unwrap() {
        let rsa = PKey::from_rsa(Rsa::generate(2048).expect("rsa")).expect("pkey");
        let mask = [0x5au8; TRANSPORT_KEY_LEN];
        let data = wrap_key(&rsa, &mask, description(), &[7u8; 16]).expect("wrap");
        let wrapped = WrappedKey::from_bytes(&data).expect("parse");
        let (desc, key) = unwrap_key(&rsa, &mask, &wrapped).expect("unwrap");
        assert_eq!(desc, description());
        assert_eq!(key.as_slice(), &[7u8; 16]);

        assert_eq!(
            unwrap_key(&rsa, &[0u8; TRANSPORT_KEY_LEN], &wrapped).err(),
            Some(ErrorCode::VERIFICATION_FAILED)
        );
    }

    #[test]
    fn test_tampered_description() {
        let rsa = PKey::from_rsa(Rsa::generate(2048).expect("rsa")).expect("pkey");
        let mask = [0u8; TRANSPORT_KEY_LEN];
        let data = wrap_key(&rsa, &mask, description(), &[7u8; 16]).expect("wrap");
        let mut wrapped = WrappedKey::from_bytes(&data).expect("parse");
        wrapped.description.key_params.push(KeyParameter::NoAuthRequired);
        assert_eq!(
            unwrap_key(&rsa, &mask, &wrapped).err(),
            Some(ErrorCode::VERIFICATION_FAILED)
        );
    }

    #[test]
    fn test_bind_secure_ids() {
        let password_bound = vec![
            KeyParameter::UserSecureId(0),
            KeyParameter::UserAuthType(HardwareAuthenticatorType::PASSWORD),
        ];
        let bound = bind_secure_ids(&password_bound, 11, 22).expect("bind");
        assert_eq!(bound.user_secure_ids(), vec![11]);
        assert_eq!(
            bind_secure_ids(&password_bound, NO_SID, 22),
            Err(ErrorCode::INVALID_USER_ID)
        );

        let either = vec![
            KeyParameter::UserSecureId(0),
            KeyParameter::UserAuthType(HardwareAuthenticatorType(
                HardwareAuthenticatorType::PASSWORD.0 | HardwareAuthenticatorType::FINGERPRINT.0,
            )),
        ];
        assert_eq!(
            bind_secure_ids(&either, 11, 22).expect("bind").user_secure_ids(),
            vec![11]
        );

        let biometric = vec![
            KeyParameter::UserSecureId(0),
            KeyParameter::UserAuthType(HardwareAuthenticatorType::FINGERPRINT),
        ];
        assert_eq!(
            bind_secure_ids(&biometric, NO_SID, 22)
                .expect("bind")
                .user_secure_ids(),
            vec![22]
        );

        let unbound = vec![KeyParameter::NoAuthRequired];
        assert_eq!(bind_secure_ids(&unbound, NO_SID, NO_SID), Ok(unbound.clone()));
    }
}
