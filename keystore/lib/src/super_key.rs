// Copyright (C) Microsoft Corporation. All rights reserved.

//! Per-user super keys binding auth-bound keys to the lock screen.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use openssl::hash::MessageDigest;
use openssl::pkcs5::pbkdf2_hmac;
use openssl::rand::rand_bytes;
use openssl::symm::decrypt_aead;
use openssl::symm::encrypt_aead;
use openssl::symm::Cipher;
use parking_lot::RwLock;
use zeroize::Zeroizing;

use crate::error::Error;
use crate::error::KsResult;
use crate::error::ResponseCode;

const SUPER_KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const PBKDF2_ITERATIONS: usize = 8192;
const SUPER_KEY_AAD: &[u8] = b"ks2 super key";

/// Lock screen state of an Android user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    /// No lock screen knowledge factor is set
    Uninitialized,

    /// A password is set but the super key is not in memory
    BeforeFirstUnlock,

    /// The super key is in memory
    AfterFirstUnlock,
}

/// A key blob encrypted under a user's super key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EncryptedBlob {
    pub user_id: u32,

    /// Super key generation; a reset user gets a new one
    pub generation: u64,
    data: Vec<u8>,
}

impl EncryptedBlob {
    fn aad(user_id: u32, generation: u64) -> Vec<u8> {
        let mut aad = user_id.to_be_bytes().to_vec();
        aad.extend_from_slice(&generation.to_be_bytes());
        aad
    }
}

struct UserRecord {
    salt: Vec<u8>,
    wrapped_key: Vec<u8>,
    generation: u64,
    super_key: Option<Zeroizing<Vec<u8>>>,
}

/// `nonce || tag || ciphertext` under AES-256-GCM.
fn seal(key: &[u8], aad: &[u8], plaintext: &[u8]) -> KsResult<Vec<u8>> {
    let mut nonce = [0u8; NONCE_LEN];
    rand_bytes(&mut nonce)?;
    let mut tag = [0u8; TAG_LEN];
    let ciphertext = encrypt_aead(
        Cipher::aes_256_gcm(),
        key,
        Some(&nonce),
        aad,
        plaintext,
        &mut tag,
    )?;
    let mut sealed = Vec::with_capacity(NONCE_LEN + TAG_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&tag);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Inverse of [`seal`]; `None` if authentication fails.
fn open(key: &[u8], aad: &[u8], sealed: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return None;
    }
    let (nonce, rest) = sealed.split_at(NONCE_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);
    decrypt_aead(Cipher::aes_256_gcm(), key, Some(nonce), aad, ciphertext, tag)
        .ok()
        .map(Zeroizing::new)
}

fn password_key(password: &[u8], salt: &[u8]) -> KsResult<Zeroizing<Vec<u8>>> {
    let mut key = Zeroizing::new(vec![0u8; SUPER_KEY_LEN]);
    pbkdf2_hmac(
        password,
        salt,
        PBKDF2_ITERATIONS,
        MessageDigest::sha256(),
        &mut key,
    )?;
    Ok(key)
}

fn wrap_super_key(password: &[u8], super_key: &[u8]) -> KsResult<(Vec<u8>, Vec<u8>)> {
    let mut salt = vec![0u8; SALT_LEN];
    rand_bytes(&mut salt)?;
    let wrapping = password_key(password, &salt)?;
    let wrapped = seal(&wrapping, SUPER_KEY_AAD, super_key)?;
    Ok((salt, wrapped))
}

/// Super keys of all users.
pub(crate) struct SuperKeyManager {
    users: RwLock<HashMap<u32, UserRecord>>,
    next_generation: AtomicU64,
}

impl SuperKeyManager {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn state(&self, user_id: u32) -> UserState {
        match self.users.read().get(&user_id) {
            None => UserState::Uninitialized,
            Some(record) if record.super_key.is_some() => UserState::AfterFirstUnlock,
            Some(_) => UserState::BeforeFirstUnlock,
        }
    }

    /// Creates the super key of a user and leaves it unlocked.
    ///
    /// # Error
    /// * `INVALID_ARGUMENT` - The user already has a password
    pub fn init_user(&self, user_id: u32, password: &[u8]) -> KsResult<()> {
        let mut users = self.users.write();
        if users.contains_key(&user_id) {
            return Err(Error::invalid_arg());
        }
        let mut super_key = Zeroizing::new(vec![0u8; SUPER_KEY_LEN]);
        rand_bytes(&mut super_key)?;
        let (salt, wrapped_key) = wrap_super_key(password, &super_key)?;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        users.insert(
            user_id,
            UserRecord {
                salt,
                wrapped_key,
                generation,
                super_key: Some(super_key),
            },
        );
        tracing::debug!(user_id, generation, "user initialized");
        Ok(())
    }

    fn unwrap_with(record: &UserRecord, password: &[u8]) -> KsResult<Zeroizing<Vec<u8>>> {
        let wrapping = password_key(password, &record.salt)?;
        open(&wrapping, SUPER_KEY_AAD, &record.wrapped_key).ok_or_else(|| {
            tracing::debug!("wrong password");
            Error::perm()
        })
    }

    /// Loads the super key into memory.
    ///
    /// # Error
    /// * `UNINITIALIZED` - The user has no password
    /// * `PERMISSION_DENIED` - Wrong password
    pub fn unlock_user(&self, user_id: u32, password: &[u8]) -> KsResult<()> {
        let mut users = self.users.write();
        let record = users
            .get_mut(&user_id)
            .ok_or(Error::Rc(ResponseCode::Uninitialized))?;
        let super_key = Self::unwrap_with(record, password)?;
        record.super_key = Some(super_key);
        tracing::debug!(user_id, "user unlocked");
        Ok(())
    }

    /// Drops the super key from memory.
    pub fn lock_user(&self, user_id: u32) -> KsResult<()> {
        let mut users = self.users.write();
        let record = users
            .get_mut(&user_id)
            .ok_or(Error::Rc(ResponseCode::Uninitialized))?;
        record.super_key = None;
        tracing::debug!(user_id, "user locked");
        Ok(())
    }

    /// Forgets the super key; keys bound to it become permanently unusable.
    pub fn reset_user(&self, user_id: u32) {
        if self.users.write().remove(&user_id).is_some() {
            tracing::debug!(user_id, "user reset");
        }
    }

    /// Re-wraps the super key under a new password.
    pub fn change_password(&self, user_id: u32, old: &[u8], new: &[u8]) -> KsResult<()> {
        let mut users = self.users.write();
        let record = users
            .get_mut(&user_id)
            .ok_or(Error::Rc(ResponseCode::Uninitialized))?;
        let super_key = Self::unwrap_with(record, old)?;
        let (salt, wrapped_key) = wrap_super_key(new, &super_key)?;
        record.salt = salt;
        record.wrapped_key = wrapped_key;
        record.super_key = Some(super_key);
        tracing::debug!(user_id, "password changed");
        Ok(())
    }

    /// Fails unless the user's super key is in memory.
    pub fn check_unlocked(&self, user_id: u32) -> KsResult<()> {
        match self.state(user_id) {
            UserState::Uninitialized => Err(Error::Rc(ResponseCode::Uninitialized)),
            UserState::BeforeFirstUnlock => Err(Error::Rc(ResponseCode::Locked)),
            UserState::AfterFirstUnlock => Ok(()),
        }
    }

    /// Encrypts `blob` under the user's super key.
    ///
    /// # Error
    /// * `UNINITIALIZED` - The user has no password
    /// * `LOCKED` - The super key is not in memory
    pub fn encrypt(&self, user_id: u32, blob: &[u8]) -> KsResult<EncryptedBlob> {
        let users = self.users.read();
        let record = users
            .get(&user_id)
            .ok_or(Error::Rc(ResponseCode::Uninitialized))?;
        let super_key = record
            .super_key
            .as_ref()
            .ok_or(Error::Rc(ResponseCode::Locked))?;
        let aad = EncryptedBlob::aad(user_id, record.generation);
        Ok(EncryptedBlob {
            user_id,
            generation: record.generation,
            data: seal(super_key, &aad, blob)?,
        })
    }

    /// Decrypts a super-encrypted blob.
    ///
    /// # Error
    /// * `KEY_PERMANENTLY_INVALIDATED` - The super key no longer exists
    /// * `LOCKED` - The super key is not in memory
    /// * `VALUE_CORRUPTED` - The blob fails authentication
    pub fn decrypt(&self, blob: &EncryptedBlob) -> KsResult<Zeroizing<Vec<u8>>> {
        let users = self.users.read();
        let record = users
            .get(&blob.user_id)
            .filter(|r| r.generation == blob.generation)
            .ok_or(Error::Rc(ResponseCode::KeyPermanentlyInvalidated))?;
        let super_key = record
            .super_key
            .as_ref()
            .ok_or(Error::Rc(ResponseCode::Locked))?;
        let aad = EncryptedBlob::aad(blob.user_id, blob.generation);
        open(super_key, &aad, &blob.data).ok_or_else(|| {
            tracing::error!(user_id = blob.user_id, "super-encrypted blob corrupted");
            Error::Rc(ResponseCode::ValueCorrupted)
        })
    }
}

#[cfg(test)]
mod tests {
    use test_with_tracing::test;

    use super::*;

    #[test]
    fn test_states() {
        let mgr = SuperKeyManager::new();
        assert_eq!(mgr.state(0), UserState::Uninitialized);
        assert_eq!(
            mgr.encrypt(0, b"blob").err(),
            Some(Error::Rc(ResponseCode::Uninitialized))
        );

        mgr.init_user(0, b"1234").expect("init");
        assert_eq!(mgr.state(0), UserState::AfterFirstUnlock);
        assert_eq!(mgr.init_user(0, b"1234"), Err(Error::invalid_arg()));
        let sealed = mgr.encrypt(0, b"blob").expect("encrypt");

        mgr.lock_user(0).expect("lock");
        assert_eq!(mgr.state(0), UserState::BeforeFirstUnlock);
        assert_eq!(mgr.decrypt(&sealed), Err(Error::Rc(ResponseCode::Locked)));
        assert_eq!(mgr.unlock_user(0, b"0000"), Err(Error::perm()));
        mgr.unlock_user(0, b"1234").expect("unlock");
        assert_eq!(mgr.decrypt(&sealed).expect("decrypt").as_slice(), b"blob");
    }

    #[test]
    fn test_reset_invalidates() {
        let mgr = SuperKeyManager::new();
        mgr.init_user(3, b"pw").expect("init");
        let sealed = mgr.encrypt(3, b"blob").expect("encrypt");
        mgr.reset_user(3);
        assert_eq!(
            mgr.decrypt(&sealed),
            Err(Error::Rc(ResponseCode::KeyPermanentlyInvalidated))
        );

        mgr.init_user(3, b"pw").expect("init again");
        assert_eq!(
            mgr.decrypt(&sealed),
            Err(Error::Rc(ResponseCode::KeyPermanentlyInvalidated))
        );
    }

    #[test]
    fn test_change_password_keeps_keys() {
        let mgr = SuperKeyManager::new();
        mgr.init_user(0, b"old").expect("init");
        let sealed = mgr.encrypt(0, b"blob").expect("encrypt");
        assert_eq!(mgr.change_password(0, b"bad", b"new"), Err(Error::perm()));
        mgr.change_password(0, b"old", b"new").expect("change");
        mgr.lock_user(0).expect("lock");
        assert_eq!(mgr.unlock_user(0, b"old"), Err(Error::perm()));
        mgr.unlock_user(0, b"new").expect("unlock");
        assert_eq!(mgr.decrypt(&sealed).expect("decrypt").as_slice(), b"blob");
    }

    #[test]
    fn test_corrupted_blob() {
        let mgr = SuperKeyManager::new();
        mgr.init_user(0, b"pw").expect("init");
        let mut sealed = mgr.encrypt(0, b"blob").expect("encrypt");
        if let Some(last) = sealed.data.last_mut() {
            *last ^= 1;
        }
        assert_eq!(
            mgr.decrypt(&sealed),
            Err(Error::Rc(ResponseCode::ValueCorrupted))
        );
    }
}
