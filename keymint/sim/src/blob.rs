// Copyright (C) Microsoft Corporation. All rights reserved.

//! Sealed key blobs.
//!
//! Layout: `MAGIC | nonce (12) | tag (16) | AES-256-GCM(json(BlobContents))`,
//! with `MAGIC` as associated data.

use ks2_keymint_interface::ErrorCode;
use ks2_keymint_interface::KeyParameter;
use ks2_keymint_interface::KmResult;
use openssl::symm::decrypt_aead;
use openssl::symm::encrypt_aead;
use openssl::symm::Cipher;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;
use zeroize::Zeroize;
use zeroize::ZeroizeOnDrop;
use zeroize::Zeroizing;

use crate::error::OsslResultExt;
use crate::patch_level::PatchLevels;
use crate::rng::EntropyPool;

const MAGIC: &[u8; 4] = b"KS2B";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Secret key material.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub(crate) enum KeyMaterial {
    /// Raw AES key
    Aes(Vec<u8>),

    /// Raw HMAC key
    Hmac(Vec<u8>),

    /// DER private key
    Ec(Vec<u8>),

    /// DER private key
    Rsa(Vec<u8>),
}

/// Plaintext contents of a blob.
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct BlobContents {
    /// Identity shared by a blob and its upgraded successors
    pub(crate) id: Uuid,

    /// Patch levels the blob was sealed at
    pub(crate) levels: PatchLevels,

    /// Hardware enforced characteristics
    pub(crate) characteristics: Vec<KeyParameter>,

    /// Secret key material
    pub(crate) material: KeyMaterial,
}

/// Encrypts `contents` under `root_key`.
pub(crate) fn seal(
    root_key: &[u8],
    rng: &EntropyPool,
    contents: &BlobContents,
) -> KmResult<Vec<u8>> {
    let plain = Zeroizing::new(serde_json::to_vec(contents).map_err(|err| {
        tracing::error!(error = %err, "blob serialization failed");
        ErrorCode::UNKNOWN_ERROR
    })?);
    let nonce = rng.bytes(NONCE_LEN)?;
    let mut tag = [0u8; TAG_LEN];
    let cipher = encrypt_aead(
        Cipher::aes_256_gcm(),
        root_key,
        Some(&nonce),
        MAGIC,
        &plain,
        &mut tag,
    )
    .or_unknown()?;

    let mut blob = Vec::with_capacity(MAGIC.len() + NONCE_LEN + TAG_LEN + cipher.len());
    blob.extend_from_slice(MAGIC);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&tag);
    blob.extend_from_slice(&cipher);
    Ok(blob)
}

/// Decrypts and parses a blob.
///
/// # Error
/// * `ErrorCode::INVALID_KEY_BLOB` - The blob was not sealed under `root_key`
pub(crate) fn unseal(root_key: &[u8], blob: &[u8]) -> KmResult<BlobContents> {
    let header = MAGIC.len() + NONCE_LEN + TAG_LEN;
    if blob.len() < header || &blob[..MAGIC.len()] != MAGIC {
        return Err(ErrorCode::INVALID_KEY_BLOB);
    }
    let nonce = &blob[MAGIC.len()..MAGIC.len() + NONCE_LEN];
    let tag = &blob[MAGIC.len() + NONCE_LEN..header];
    let plain = Zeroizing::new(
        decrypt_aead(
            Cipher::aes_256_gcm(),
            root_key,
            Some(nonce),
            MAGIC,
            &blob[header..],
            tag,
        )
        .or_km(ErrorCode::INVALID_KEY_BLOB)?,
    );
    serde_json::from_slice(&plain).map_err(|_| ErrorCode::INVALID_KEY_BLOB)
}
