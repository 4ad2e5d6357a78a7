// Copyright (C) Microsoft Corporation. All rights reserved.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use ks2_keymint_interface::*;
use ks2_keymint_sim::SimConfig;
use ks2_keymint_sim::SoftKeyMint;
use ks2_keystore::*;

/// Ordinary app
pub const APP_UID: u32 = 10_001;

/// Second app, used as grantee
pub const OTHER_APP_UID: u32 = 10_002;

/// Privileged system uid
pub const SYSTEM_UID: u32 = 1_000;

/// SELinux namespace of the system uid
pub const SYSTEM_NSPACE: i64 = 102;

pub const PASSWORD_SID: i64 = 1111;
pub const FINGERPRINT_SID: i64 = 2222;

pub fn policy() -> PolicyConfig {
    PolicyConfig {
        privileged: vec![PrivilegedUid {
            uid: SYSTEM_UID,
            key_perms: vec![KeyPerm::ReqForcedOp],
            keystore_perms: vec![
                KeystorePerm::AddAuth,
                KeystorePerm::ChangePassword,
                KeystorePerm::Lock,
                KeystorePerm::Unlock,
            ],
        }],
        namespaces: vec![NamespaceAccess {
            nspace: SYSTEM_NSPACE,
            uid: SYSTEM_UID,
            perms: vec![
                KeyPerm::Delete,
                KeyPerm::GetInfo,
                KeyPerm::ManageBlob,
                KeyPerm::Rebind,
                KeyPerm::ReqForcedOp,
                KeyPerm::Update,
                KeyPerm::Use,
            ],
        }],
    }
}

/// Service with one software backend.
pub struct TestKeystore {
    pub service: KeystoreService,
    pub level: Arc<dyn KeyManagement>,

    /// Shares state with the attached backend
    pub device: SoftKeyMint,
}

pub fn keystore_with(max_operations: usize, sim: SimConfig) -> TestKeystore {
    let ids = BTreeMap::from([(APP_UID, vec!["com.example.app".to_string()])]);
    let mut service = KeystoreService::new(
        Box::new(DefaultPolicy::new(policy())),
        Box::new(ConfigAttestationIds::new(ids)),
        Box::new(NoRemoteProvisioning),
        max_operations,
    );
    let device = SoftKeyMint::new(sim).expect("device");
    let level = service
        .add_security_level(device.clone())
        .expect("security level");
    TestKeystore {
        service,
        level,
        device,
    }
}

pub fn keystore() -> TestKeystore {
    keystore_with(
        DEFAULT_MAX_OPERATIONS,
        SimConfig {
            patch_levels: "2024-01-01".parse().expect("levels"),
            ..Default::default()
        },
    )
}

pub fn app() -> CallerContext {
    CallerContext::new(APP_UID)
}

pub fn other_app() -> CallerContext {
    CallerContext::new(OTHER_APP_UID)
}

pub fn system() -> CallerContext {
    CallerContext::new(SYSTEM_UID)
}

pub fn ec_sign_key() -> Vec<KeyParameter> {
    vec![
        KeyParameter::Algorithm(Algorithm::Ec),
        KeyParameter::EcCurve(EcCurve::P256),
        KeyParameter::Purpose(KeyPurpose::Sign),
        KeyParameter::Digest(Digest::Sha256),
        KeyParameter::NoAuthRequired,
    ]
}

pub fn sign_op() -> Vec<KeyParameter> {
    vec![
        KeyParameter::Purpose(KeyPurpose::Sign),
        KeyParameter::Digest(Digest::Sha256),
    ]
}

pub fn aes_gcm_key() -> Vec<KeyParameter> {
    vec![
        KeyParameter::Algorithm(Algorithm::Aes),
        KeyParameter::KeySize(128),
        KeyParameter::Purpose(KeyPurpose::Encrypt),
        KeyParameter::Purpose(KeyPurpose::Decrypt),
        KeyParameter::BlockMode(BlockMode::Gcm),
        KeyParameter::Padding(PaddingMode::None),
        KeyParameter::MinMacLength(128),
        KeyParameter::NoAuthRequired,
    ]
}

pub fn gcm_encrypt_op() -> Vec<KeyParameter> {
    vec![
        KeyParameter::Purpose(KeyPurpose::Encrypt),
        KeyParameter::BlockMode(BlockMode::Gcm),
        KeyParameter::Padding(PaddingMode::None),
        KeyParameter::MacLength(128),
    ]
}

pub fn gcm_decrypt_op(nonce: Vec<u8>) -> Vec<KeyParameter> {
    vec![
        KeyParameter::Purpose(KeyPurpose::Decrypt),
        KeyParameter::BlockMode(BlockMode::Gcm),
        KeyParameter::Padding(PaddingMode::None),
        KeyParameter::MacLength(128),
        KeyParameter::Nonce(nonce),
    ]
}

/// AES key bound to the password authenticator.
pub fn auth_bound_aes_key(timeout: Option<u32>) -> Vec<KeyParameter> {
    let mut params = vec![
        KeyParameter::Algorithm(Algorithm::Aes),
        KeyParameter::KeySize(128),
        KeyParameter::Purpose(KeyPurpose::Encrypt),
        KeyParameter::BlockMode(BlockMode::Ecb),
        KeyParameter::UserSecureId(PASSWORD_SID),
        KeyParameter::UserAuthType(HardwareAuthenticatorType::PASSWORD),
    ];
    if let Some(secs) = timeout {
        params.push(KeyParameter::AuthTimeout(secs));
    }
    params
}

pub fn ecb_encrypt_op() -> Vec<KeyParameter> {
    vec![
        KeyParameter::Purpose(KeyPurpose::Encrypt),
        KeyParameter::BlockMode(BlockMode::Ecb),
        KeyParameter::Padding(PaddingMode::None),
    ]
}

pub fn password_token(challenge: i64) -> HardwareAuthToken {
    HardwareAuthToken {
        challenge,
        user_id: PASSWORD_SID,
        authenticator_type: HardwareAuthenticatorType::PASSWORD,
        ..Default::default()
    }
}

pub fn generate(
    ks: &TestKeystore,
    caller: &CallerContext,
    key: &KeyDescriptor,
    params: &[KeyParameter],
) -> KeyMetadata {
    ks.level
        .generate_key(caller, key, None, params, 0, &[])
        .expect("generate")
}

/// Starts an operation that needs no user authentication.
pub fn begin(
    ks: &TestKeystore,
    caller: &CallerContext,
    key: &KeyDescriptor,
    params: &[KeyParameter],
) -> Arc<KeystoreOperation> {
    ks.level
        .create_operation(caller, key, params, false)
        .expect("create operation")
        .operation
}

/// Sets a password for user 0 and leaves it unlocked.
pub fn init_user_zero(ks: &TestKeystore) {
    ks.service
        .init_user(&system(), 0, b"1234")
        .expect("init user");
}

pub fn verify_ec_signature(certificate: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let cert = openssl::x509::X509::from_der(certificate).expect("cert");
    let public = cert.public_key().expect("public key");
    let mut verifier =
        openssl::sign::Verifier::new(openssl::hash::MessageDigest::sha256(), &public)
            .expect("verifier");
    verifier.update(message).expect("update");
    verifier.verify(signature).expect("verify")
}
