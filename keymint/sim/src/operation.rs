// Copyright (C) Microsoft Corporation. All rights reserved.

//! Streaming cryptographic operations.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use ks2_keymint_interface::Algorithm;
use ks2_keymint_interface::BlockMode;
use ks2_keymint_interface::ErrorCode;
use ks2_keymint_interface::HardwareAuthToken;
use ks2_keymint_interface::KeyMintOperation;
use ks2_keymint_interface::KeyParameter;
use ks2_keymint_interface::KeyParameterSet;
use ks2_keymint_interface::KeyPurpose;
use ks2_keymint_interface::KmResult;
use ks2_keymint_interface::PaddingMode;
use ks2_keymint_interface::Tag;
use openssl::encrypt::Decrypter;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use openssl::rsa::Padding;
use openssl::sign::RsaPssSaltlen;
use openssl::sign::Signer;
use openssl::symm::Cipher;
use openssl::symm::Crypter;
use openssl::symm::Mode;

use crate::auth::AuthRequirement;
use crate::blob::BlobContents;
use crate::blob::KeyMaterial;
use crate::error::OsslResultExt;
use crate::keys::message_digest;
use crate::keys::private_key;
use crate::rng::EntropyPool;

const GCM_NONCE_LEN: usize = 12;
const BLOCK_IV_LEN: usize = 16;
const MAX_GCM_TAG_BITS: u32 = 128;

/// Counts a live operation against the backend limit.
pub(crate) struct SlotGuard(Arc<AtomicUsize>);

impl SlotGuard {
    /// Takes one slot.
    ///
    /// # Error
    /// * `ErrorCode::TOO_MANY_OPERATIONS` - All `max` slots are taken
    pub(crate) fn acquire(live: &Arc<AtomicUsize>, max: Option<usize>) -> KmResult<Self> {
        let mut current = live.load(Ordering::Acquire);
        loop {
            if max.is_some_and(|max| current >= max) {
                return Err(ErrorCode::TOO_MANY_OPERATIONS);
            }
            match live.compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(SlotGuard(live.clone())),
                Err(actual) => current = actual,
            }
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

struct GcmOp {
    crypter: Crypter,
    encrypt: bool,
    tag_len: usize,
    aad_open: bool,
    /// Trailing input that may be the tag (decrypt only)
    held: Vec<u8>,
}

struct BlockOp {
    crypter: Crypter,
    block_size: usize,
}

struct MacOp {
    key: PKey<Private>,
    md: MessageDigest,
    mac_len: usize,
    min_mac_len: usize,
    verify: bool,
    buf: Vec<u8>,
}

struct SignOp {
    key: PKey<Private>,
    md: MessageDigest,
    padding: Option<Padding>,
    buf: Vec<u8>,
}

struct DecryptOp {
    key: PKey<Private>,
    padding: Padding,
    md: Option<MessageDigest>,
    buf: Vec<u8>,
}

enum OpKind {
    Gcm(GcmOp),
    Block(BlockOp),
    Mac(MacOp),
    Sign(SignOp),
    Decrypt(DecryptOp),
}

fn crypt(crypter: &mut Crypter, block_size: usize, input: &[u8]) -> KmResult<Vec<u8>> {
    let mut out = vec![0u8; input.len() + block_size];
    let n = crypter.update(input, &mut out).or_unknown()?;
    out.truncate(n);
    Ok(out)
}

fn aes_cipher(key_len: usize, mode: BlockMode) -> KmResult<Cipher> {
    let cipher = match (key_len, mode) {
        (16, BlockMode::Ecb) => Cipher::aes_128_ecb(),
        (24, BlockMode::Ecb) => Cipher::aes_192_ecb(),
        (32, BlockMode::Ecb) => Cipher::aes_256_ecb(),
        (16, BlockMode::Cbc) => Cipher::aes_128_cbc(),
        (24, BlockMode::Cbc) => Cipher::aes_192_cbc(),
        (32, BlockMode::Cbc) => Cipher::aes_256_cbc(),
        (16, BlockMode::Ctr) => Cipher::aes_128_ctr(),
        (24, BlockMode::Ctr) => Cipher::aes_192_ctr(),
        (32, BlockMode::Ctr) => Cipher::aes_256_ctr(),
        (16, BlockMode::Gcm) => Cipher::aes_128_gcm(),
        (24, BlockMode::Gcm) => Cipher::aes_192_gcm(),
        (32, BlockMode::Gcm) => Cipher::aes_256_gcm(),
        _ => return Err(ErrorCode::UNSUPPORTED_KEY_SIZE),
    };
    Ok(cipher)
}

fn rsa_sign_padding(padding: Option<PaddingMode>) -> KmResult<Padding> {
    match padding {
        Some(PaddingMode::RsaPss) => Ok(Padding::PKCS1_PSS),
        Some(PaddingMode::RsaPkcs115Sign) => Ok(Padding::PKCS1),
        _ => Err(ErrorCode::UNSUPPORTED_PADDING_MODE),
    }
}

/// Operation digest, which must be one the key allows.
fn authorized_digest(chars: &[KeyParameter], params: &[KeyParameter]) -> KmResult<MessageDigest> {
    let digest = params.digest().ok_or(ErrorCode::UNSUPPORTED_DIGEST)?;
    if !chars.digests().contains(&digest) {
        return Err(ErrorCode::INCOMPATIBLE_DIGEST);
    }
    message_digest(digest)
}

fn authorized_padding(chars: &[KeyParameter], padding: PaddingMode) -> KmResult<()> {
    let allowed = chars.iter().any(|p| *p == KeyParameter::Padding(padding));
    if padding != PaddingMode::None && !allowed {
        return Err(ErrorCode::INCOMPATIBLE_PADDING_MODE);
    }
    Ok(())
}

impl OpKind {
    /// Sets up the primitive for `purpose`, returning it with any output
    /// parameters (a generated nonce).
    fn new(
        purpose: KeyPurpose,
        contents: &BlobContents,
        params: &[KeyParameter],
        rng: &EntropyPool,
    ) -> KmResult<(Self, Vec<KeyParameter>)> {
        let chars = contents.characteristics.as_slice();
        match (&contents.material, purpose) {
            (KeyMaterial::Aes(key), KeyPurpose::Encrypt | KeyPurpose::Decrypt) => {
                Self::new_aes(key, purpose == KeyPurpose::Encrypt, chars, params, rng)
            }
            (KeyMaterial::Hmac(key), KeyPurpose::Sign | KeyPurpose::Verify) => {
                let digest = chars.digest().ok_or(ErrorCode::UNSUPPORTED_DIGEST)?;
                if params.digest().is_some_and(|d| d != digest) {
                    return Err(ErrorCode::INCOMPATIBLE_DIGEST);
                }
                let md = message_digest(digest)?;
                let min_mac_len = chars.min_mac_length().unwrap_or(0) as usize / 8;
                let verify = purpose == KeyPurpose::Verify;
                let mac_len = if verify {
                    md.size()
                } else {
                    let bits = params.mac_length().ok_or(ErrorCode::MISSING_MAC_LENGTH)?;
                    if bits % 8 != 0 || bits as usize > md.size() * 8 {
                        return Err(ErrorCode::UNSUPPORTED_MAC_LENGTH);
                    }
                    if (bits as usize / 8) < min_mac_len {
                        return Err(ErrorCode::INVALID_MAC_LENGTH);
                    }
                    bits as usize / 8
                };
                let op = MacOp {
                    key: PKey::hmac(key).or_unknown()?,
                    md,
                    mac_len,
                    min_mac_len,
                    verify,
                    buf: Vec::new(),
                };
                Ok((OpKind::Mac(op), vec![]))
            }
            (KeyMaterial::Ec(_), KeyPurpose::Sign) => {
                let op = SignOp {
                    key: private_key(&contents.material)?,
                    md: authorized_digest(chars, params)?,
                    padding: None,
                    buf: Vec::new(),
                };
                Ok((OpKind::Sign(op), vec![]))
            }
            (KeyMaterial::Rsa(_), KeyPurpose::Sign) => {
                let padding = params.padding();
                let rsa_padding = rsa_sign_padding(padding)?;
                authorized_padding(chars, padding.unwrap_or(PaddingMode::None))?;
                let op = SignOp {
                    key: private_key(&contents.material)?,
                    md: authorized_digest(chars, params)?,
                    padding: Some(rsa_padding),
                    buf: Vec::new(),
                };
                Ok((OpKind::Sign(op), vec![]))
            }
            (KeyMaterial::Rsa(_), KeyPurpose::Decrypt) => {
                let padding = params.padding().unwrap_or(PaddingMode::None);
                authorized_padding(chars, padding)?;
                let (padding, md) = match padding {
                    PaddingMode::RsaOaep => {
                        (Padding::PKCS1_OAEP, Some(authorized_digest(chars, params)?))
                    }
                    PaddingMode::RsaPkcs115Encrypt => (Padding::PKCS1, None),
                    PaddingMode::None => (Padding::NONE, None),
                    _ => return Err(ErrorCode::UNSUPPORTED_PADDING_MODE),
                };
                let op = DecryptOp {
                    key: private_key(&contents.material)?,
                    padding,
                    md,
                    buf: Vec::new(),
                };
                Ok((OpKind::Decrypt(op), vec![]))
            }
            _ => Err(ErrorCode::UNSUPPORTED_PURPOSE),
        }
    }

    fn new_aes(
        key: &[u8],
        encrypt: bool,
        chars: &[KeyParameter],
        params: &[KeyParameter],
        rng: &EntropyPool,
    ) -> KmResult<(Self, Vec<KeyParameter>)> {
        let mode = params.block_mode().ok_or(ErrorCode::UNSUPPORTED_BLOCK_MODE)?;
        if !chars.contains(&KeyParameter::BlockMode(mode)) {
            return Err(ErrorCode::INCOMPATIBLE_BLOCK_MODE);
        }
        let padding = params.padding().unwrap_or(PaddingMode::None);
        match (mode, padding) {
            (BlockMode::Gcm | BlockMode::Ctr, PaddingMode::None) => {}
            (BlockMode::Gcm | BlockMode::Ctr, _) => {
                return Err(ErrorCode::INCOMPATIBLE_PADDING_MODE)
            }
            (_, PaddingMode::None | PaddingMode::Pkcs7) => {}
            _ => return Err(ErrorCode::UNSUPPORTED_PADDING_MODE),
        }
        authorized_padding(chars, padding)?;
        let cipher = aes_cipher(key.len(), mode)?;

        let mut out_params = Vec::new();
        let iv = match mode {
            BlockMode::Ecb => None,
            _ => {
                let iv_len = if mode == BlockMode::Gcm {
                    GCM_NONCE_LEN
                } else {
                    BLOCK_IV_LEN
                };
                match params.nonce() {
                    Some(nonce) => {
                        if encrypt && !chars.has_tag(Tag::CallerNonce) {
                            return Err(ErrorCode::CALLER_NONCE_PROHIBITED);
                        }
                        if nonce.len() != iv_len {
                            return Err(ErrorCode::INVALID_NONCE);
                        }
                        Some(nonce)
                    }
                    None if encrypt => {
                        let nonce = rng.bytes(iv_len)?;
                        out_params.push(KeyParameter::Nonce(nonce.clone()));
                        Some(nonce)
                    }
                    None => return Err(ErrorCode::MISSING_NONCE),
                }
            }
        };

        let direction = if encrypt { Mode::Encrypt } else { Mode::Decrypt };
        let mut crypter = Crypter::new(cipher, direction, key, iv.as_deref()).or_unknown()?;
        let kind = if mode == BlockMode::Gcm {
            let bits = params.mac_length().ok_or(ErrorCode::MISSING_MAC_LENGTH)?;
            if bits % 8 != 0 || bits > MAX_GCM_TAG_BITS {
                return Err(ErrorCode::UNSUPPORTED_MAC_LENGTH);
            }
            if chars.min_mac_length().is_some_and(|min| bits < min) {
                return Err(ErrorCode::INVALID_MAC_LENGTH);
            }
            OpKind::Gcm(GcmOp {
                crypter,
                encrypt,
                tag_len: bits as usize / 8,
                aad_open: true,
                held: Vec::new(),
            })
        } else {
            crypter.pad(padding == PaddingMode::Pkcs7);
            OpKind::Block(BlockOp {
                crypter,
                block_size: cipher.block_size(),
            })
        };
        Ok((kind, out_params))
    }

    fn update_aad(&mut self, aad: &[u8]) -> KmResult<()> {
        match self {
            OpKind::Gcm(op) if op.aad_open => op.crypter.aad_update(aad).or_unknown(),
            OpKind::Gcm(_) => Err(ErrorCode::INVALID_TAG),
            _ => Err(ErrorCode::INVALID_OPERATION),
        }
    }

    fn update(&mut self, input: &[u8]) -> KmResult<Vec<u8>> {
        match self {
            OpKind::Gcm(op) => {
                op.aad_open = false;
                if op.encrypt {
                    return crypt(&mut op.crypter, 1, input);
                }
                op.held.extend_from_slice(input);
                if op.held.len() <= op.tag_len {
                    return Ok(Vec::new());
                }
                let body: Vec<u8> = op.held.drain(..op.held.len() - op.tag_len).collect();
                crypt(&mut op.crypter, 1, &body)
            }
            OpKind::Block(op) => crypt(&mut op.crypter, op.block_size, input),
            OpKind::Mac(MacOp { buf, .. })
            | OpKind::Sign(SignOp { buf, .. })
            | OpKind::Decrypt(DecryptOp { buf, .. }) => {
                buf.extend_from_slice(input);
                Ok(Vec::new())
            }
        }
    }

    fn finish(&mut self, signature: Option<&[u8]>) -> KmResult<Vec<u8>> {
        match self {
            OpKind::Gcm(op) if op.encrypt => {
                let mut out = vec![0u8; 16];
                let n = op.crypter.finalize(&mut out).or_unknown()?;
                out.truncate(n);
                let mut tag = vec![0u8; op.tag_len];
                op.crypter.get_tag(&mut tag).or_unknown()?;
                out.extend_from_slice(&tag);
                Ok(out)
            }
            OpKind::Gcm(op) => {
                if op.held.len() != op.tag_len {
                    return Err(ErrorCode::VERIFICATION_FAILED);
                }
                op.crypter.set_tag(&op.held).or_unknown()?;
                let mut out = vec![0u8; 16];
                let n = op
                    .crypter
                    .finalize(&mut out)
                    .or_km(ErrorCode::VERIFICATION_FAILED)?;
                out.truncate(n);
                Ok(out)
            }
            OpKind::Block(op) => {
                let mut out = vec![0u8; op.block_size * 2];
                let n = op
                    .crypter
                    .finalize(&mut out)
                    .or_km(ErrorCode::INVALID_ARGUMENT)?;
                out.truncate(n);
                Ok(out)
            }
            OpKind::Mac(op) => {
                let mut signer = Signer::new(op.md, &op.key).or_unknown()?;
                signer.update(&op.buf).or_unknown()?;
                let mut mac = signer.sign_to_vec().or_unknown()?;
                if !op.verify {
                    mac.truncate(op.mac_len);
                    return Ok(mac);
                }
                let expected = signature.ok_or(ErrorCode::VERIFICATION_FAILED)?;
                if expected.len() < op.min_mac_len
                    || expected.len() > mac.len()
                    || !openssl::memcmp::eq(&mac[..expected.len()], expected)
                {
                    return Err(ErrorCode::VERIFICATION_FAILED);
                }
                Ok(Vec::new())
            }
            OpKind::Sign(op) => {
                let mut signer = Signer::new(op.md, &op.key).or_unknown()?;
                if let Some(padding) = op.padding {
                    signer.set_rsa_padding(padding).or_unknown()?;
                    if padding == Padding::PKCS1_PSS {
                        signer
                            .set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)
                            .or_unknown()?;
                    }
                }
                signer.update(&op.buf).or_unknown()?;
                signer.sign_to_vec().or_unknown()
            }
            OpKind::Decrypt(op) => {
                let mut decrypter = Decrypter::new(&op.key).or_unknown()?;
                decrypter.set_rsa_padding(op.padding).or_unknown()?;
                if let Some(md) = op.md {
                    decrypter.set_rsa_oaep_md(md).or_unknown()?;
                    decrypter.set_rsa_mgf1_md(MessageDigest::sha1()).or_unknown()?;
                }
                let len = decrypter.decrypt_len(&op.buf).or_unknown()?;
                let mut out = vec![0u8; len];
                let n = decrypter
                    .decrypt(&op.buf, &mut out)
                    .or_km(ErrorCode::INVALID_ARGUMENT)?;
                out.truncate(n);
                Ok(out)
            }
        }
    }
}

/// Software operation handed out by [`crate::SoftKeyMint`].
pub(crate) struct SoftOperation {
    kind: OpKind,
    auth: AuthRequirement,
    slot: Option<SlotGuard>,
}

impl SoftOperation {
    /// Starts an operation on an unsealed key.
    pub(crate) fn begin(
        purpose: KeyPurpose,
        contents: &BlobContents,
        params: &[KeyParameter],
        auth_token: Option<&HardwareAuthToken>,
        challenge: i64,
        slot: SlotGuard,
        rng: &EntropyPool,
    ) -> KmResult<(Self, Vec<KeyParameter>)> {
        let chars = contents.characteristics.as_slice();
        if chars.has_tag(Tag::StorageKey) || purpose == KeyPurpose::WrapKey {
            return Err(ErrorCode::UNSUPPORTED_PURPOSE);
        }
        if !chars.purposes().contains(&purpose) {
            return Err(ErrorCode::INCOMPATIBLE_PURPOSE);
        }
        if chars.algorithm() == Some(Algorithm::TripleDes) {
            return Err(ErrorCode::UNSUPPORTED_ALGORITHM);
        }
        let (kind, out_params) = OpKind::new(purpose, contents, params, rng)?;
        let mut auth = AuthRequirement::for_key(chars, challenge);
        auth.try_authorize(auth_token);
        Ok((
            SoftOperation {
                kind,
                auth,
                slot: Some(slot),
            },
            out_params,
        ))
    }

    fn run<T>(
        &mut self,
        auth_token: Option<&HardwareAuthToken>,
        f: impl FnOnce(&mut OpKind) -> KmResult<T>,
    ) -> KmResult<T> {
        if self.slot.is_none() {
            return Err(ErrorCode::INVALID_OPERATION_HANDLE);
        }
        let result = self.auth.authorize(auth_token).and_then(|_| f(&mut self.kind));
        if result.is_err() {
            self.slot = None;
        }
        result
    }
}

impl KeyMintOperation for SoftOperation {
    fn update_aad(&mut self, aad: &[u8], auth_token: Option<&HardwareAuthToken>) -> KmResult<()> {
        self.run(auth_token, |kind| kind.update_aad(aad))
    }

    fn update(&mut self, input: &[u8], auth_token: Option<&HardwareAuthToken>) -> KmResult<Vec<u8>> {
        self.run(auth_token, |kind| kind.update(input))
    }

    fn finish(
        &mut self,
        input: Option<&[u8]>,
        signature: Option<&[u8]>,
        auth_token: Option<&HardwareAuthToken>,
    ) -> KmResult<Vec<u8>> {
        let result = self.run(auth_token, |kind| {
            let mut out = match input {
                Some(input) => kind.update(input)?,
                None => Vec::new(),
            };
            out.extend(kind.finish(signature)?);
            Ok(out)
        });
        self.slot = None;
        result
    }

    fn abort(&mut self) -> KmResult<()> {
        match self.slot.take() {
            Some(_) => Ok(()),
            None => Err(ErrorCode::INVALID_OPERATION_HANDLE),
        }
    }
}
