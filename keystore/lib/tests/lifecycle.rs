// Copyright (C) Microsoft Corporation. All rights reserved.

mod common;

use ks2_keymint_interface::*;
use ks2_keymint_sim::PatchLevels;
use ks2_keystore::*;
use openssl::ec::EcGroup;
use openssl::ec::EcKey;
use openssl::nid::Nid;
use openssl::pkey::PKey;
use test_with_tracing::test;

use crate::common::*;

fn update_patch_levels(ks: &TestKeystore) {
    let levels: PatchLevels = "2024-06-01".parse().expect("levels");
    ks.device.set_patch_levels(levels);
}

fn storage_key() -> Vec<KeyParameter> {
    vec![
        KeyParameter::Algorithm(Algorithm::Aes),
        KeyParameter::KeySize(256),
        KeyParameter::StorageKey,
    ]
}

#[test]
fn test_generate_returns_key_id() {
    let ks = keystore();
    let metadata = generate(&ks, &app(), &KeyDescriptor::app("ec"), &ec_sign_key());
    assert_eq!(metadata.key.domain, Domain::KeyId);
    assert_eq!(metadata.key.alias.as_deref(), Some("ec"));
    assert_eq!(metadata.key_security_level, SecurityLevel::TrustedEnvironment);
    assert!(metadata.certificate.is_some());
    assert!(metadata.certificate_chain.is_none());
    assert!(metadata
        .authorizations
        .iter()
        .any(|a| a.key_parameter == KeyParameter::Algorithm(Algorithm::Ec)));
    assert!(metadata
        .authorizations
        .iter()
        .any(|a| matches!(a.key_parameter, KeyParameter::CreationDateTime(_))));

    // The key id addresses the same key.
    let op = begin(&ks, &app(), &metadata.key, &sign_op());
    assert!(op.finish(Some(b"msg"), None).expect("finish").is_some());
}

#[test]
fn test_rebound_alias_invalidates_old_id() {
    let ks = keystore();
    let alias = KeyDescriptor::app("k");
    let first = generate(&ks, &app(), &alias, &ec_sign_key());
    let second = generate(&ks, &app(), &alias, &ec_sign_key());
    assert_ne!(first.key.nspace, second.key.nspace);

    let result = ks
        .level
        .create_operation(&app(), &first.key, &sign_op(), false);
    assert_eq!(result.err(), Some(Error::Rc(ResponseCode::KeyNotFound)));
    assert!(ks
        .level
        .create_operation(&app(), &second.key, &sign_op(), false)
        .is_ok());
    assert!(ks
        .level
        .create_operation(&app(), &alias, &sign_op(), false)
        .is_ok());
}

#[test]
fn test_creation_targets() {
    let ks = keystore();
    for key in [KeyDescriptor::key_id(5), KeyDescriptor::grant(5)] {
        assert_eq!(
            ks.level
                .generate_key(&app(), &key, None, &ec_sign_key(), 0, &[])
                .err(),
            Some(Error::Rc(ResponseCode::InvalidArgument))
        );
    }
    assert_eq!(
        ks.level
            .generate_key(
                &app(),
                &KeyDescriptor::selinux(SYSTEM_NSPACE, "x"),
                None,
                &ec_sign_key(),
                0,
                &[]
            )
            .err(),
        Some(Error::perm())
    );
    assert_eq!(
        ks.level
            .generate_key(
                &app(),
                &KeyDescriptor::blob(SYSTEM_NSPACE, Vec::new()),
                None,
                &ec_sign_key(),
                0,
                &[]
            )
            .err(),
        Some(Error::perm())
    );
    assert_eq!(
        ks.level
            .generate_key(&app(), &KeyDescriptor::app("x"), None, &ec_sign_key(), 0x10, &[])
            .err(),
        Some(Error::Rc(ResponseCode::InvalidArgument))
    );
}

#[test]
fn test_blob_key_lifecycle() {
    let ks = keystore();
    let metadata = generate(
        &ks,
        &system(),
        &KeyDescriptor::blob(SYSTEM_NSPACE, Vec::new()),
        &ec_sign_key(),
    );
    assert_eq!(metadata.key.domain, Domain::Blob);
    assert_eq!(metadata.key.nspace, SYSTEM_NSPACE);
    let blob_key = metadata.key;
    assert!(blob_key.blob.as_ref().is_some_and(|b| !b.is_empty()));

    let response = ks
        .level
        .create_operation(&system(), &blob_key, &sign_op(), false)
        .expect("create operation");
    assert_eq!(response.upgraded_blob, None);
    drop(response);

    // Apps may not use caller-held blobs.
    assert_eq!(
        ks.level
            .create_operation(&app(), &blob_key, &sign_op(), false)
            .err(),
        Some(Error::perm())
    );

    // Blob keys are not stored, so the service refuses them.
    assert_eq!(
        ks.service.delete_key(&system(), &blob_key),
        Err(Error::Rc(ResponseCode::InvalidArgument))
    );
    assert_eq!(ks.level.delete_key(&system(), &blob_key), Ok(()));
    assert_eq!(
        ks.level
            .create_operation(&system(), &blob_key, &sign_op(), false)
            .err(),
        Some(Error::Km(ErrorCode::INVALID_KEY_BLOB))
    );
}

#[test]
fn test_stored_key_upgraded_on_use() {
    let ks = keystore();
    let key = KeyDescriptor::app("ec");
    let before = generate(&ks, &app(), &key, &ec_sign_key());
    update_patch_levels(&ks);

    let response = ks
        .level
        .create_operation(&app(), &key, &sign_op(), false)
        .expect("create operation");
    assert_eq!(response.upgraded_blob, None);
    drop(response);

    // The upgraded blob was persisted; the key id is unchanged.
    let entry = ks.service.get_key_entry(&app(), &key).expect("entry");
    assert_eq!(entry.metadata.key.nspace, before.key.nspace);
    assert!(entry.metadata.modification_time_ms >= before.modification_time_ms);
    assert!(ks
        .level
        .create_operation(&app(), &key, &sign_op(), false)
        .is_ok());
}

#[test]
fn test_blob_key_upgrade_returned() {
    let ks = keystore();
    let metadata = generate(
        &ks,
        &system(),
        &KeyDescriptor::blob(SYSTEM_NSPACE, Vec::new()),
        &ec_sign_key(),
    );
    update_patch_levels(&ks);

    let response = ks
        .level
        .create_operation(&system(), &metadata.key, &sign_op(), false)
        .expect("create operation");
    let upgraded = response.upgraded_blob.clone().expect("upgraded blob");
    assert_ne!(Some(&upgraded), metadata.key.blob.as_ref());
    drop(response);

    let response = ks
        .level
        .create_operation(
            &system(),
            &KeyDescriptor::blob(SYSTEM_NSPACE, upgraded),
            &sign_op(),
            false,
        )
        .expect("create operation");
    assert_eq!(response.upgraded_blob, None);
}

#[test]
fn test_storage_key_conversion() {
    let ks = keystore();
    let storage = generate(
        &ks,
        &system(),
        &KeyDescriptor::blob(SYSTEM_NSPACE, Vec::new()),
        &storage_key(),
    )
    .key;
    let first = ks
        .level
        .convert_storage_key_to_ephemeral(&system(), &storage)
        .expect("convert");
    assert_eq!(first.upgraded_blob, None);
    assert!(!first.ephemeral_key.is_empty());

    update_patch_levels(&ks);
    let second = ks
        .level
        .convert_storage_key_to_ephemeral(&system(), &storage)
        .expect("convert");
    assert_eq!(second.ephemeral_key, first.ephemeral_key);
    let upgraded = second.upgraded_blob.expect("upgraded blob");
    let third = ks
        .level
        .convert_storage_key_to_ephemeral(&system(), &KeyDescriptor::blob(SYSTEM_NSPACE, upgraded))
        .expect("convert");
    assert_eq!(third.upgraded_blob, None);

    assert_eq!(
        ks.level
            .convert_storage_key_to_ephemeral(&app(), &storage)
            .err(),
        Some(Error::perm())
    );
    assert_eq!(
        ks.level
            .convert_storage_key_to_ephemeral(&system(), &KeyDescriptor::app("x"))
            .err(),
        Some(Error::Rc(ResponseCode::InvalidArgument))
    );
}

#[test]
fn test_import_raw_aes() {
    let ks = keystore();
    let key = KeyDescriptor::app("aes");
    let params = vec![
        KeyParameter::Algorithm(Algorithm::Aes),
        KeyParameter::KeySize(128),
        KeyParameter::Purpose(KeyPurpose::Encrypt),
        KeyParameter::BlockMode(BlockMode::Ecb),
        KeyParameter::NoAuthRequired,
    ];
    let metadata = ks
        .level
        .import_key(&app(), &key, None, &params, 0, &[0u8; 16])
        .expect("import");
    assert!(metadata
        .authorizations
        .iter()
        .any(|a| a.key_parameter == KeyParameter::Origin(KeyOrigin::Imported)));

    let op = begin(&ks, &app(), &key, &ecb_encrypt_op());
    let output = op
        .finish(Some(&[0u8; 16]), None)
        .expect("finish")
        .expect("output");
    assert_eq!(hex::encode(output), "66e94bd4ef8a2c3b884cfa59ca342b2e");
}

#[test]
fn test_import_pkcs8_ec() {
    let ks = keystore();
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).expect("group");
    let private = PKey::from_ec_key(EcKey::generate(&group).expect("ec key")).expect("pkey");
    let pkcs8 = private.private_key_to_pkcs8().expect("pkcs8");

    let key = KeyDescriptor::app("imported");
    let metadata = ks
        .level
        .import_key(&app(), &key, None, &ec_sign_key(), 0, &pkcs8)
        .expect("import");
    let certificate = metadata.certificate.expect("certificate");
    let cert_key = openssl::x509::X509::from_der(&certificate)
        .expect("cert")
        .public_key()
        .expect("public");
    assert!(cert_key.public_eq(&private));

    let op = begin(&ks, &app(), &key, &sign_op());
    let signature = op
        .finish(Some(b"imported"), None)
        .expect("finish")
        .expect("signature");
    assert!(verify_ec_signature(&certificate, b"imported", &signature));

    assert_eq!(
        ks.level
            .import_key(&app(), &key, None, &[KeyParameter::KeySize(256)], 0, &pkcs8)
            .err(),
        Some(Error::Km(ErrorCode::INVALID_ARGUMENT))
    );
}

#[test]
fn test_attestation_key_chain() {
    let ks = keystore();
    let attest = KeyDescriptor::app("attest");
    let attest_params = vec![
        KeyParameter::Algorithm(Algorithm::Ec),
        KeyParameter::EcCurve(EcCurve::P256),
        KeyParameter::Purpose(KeyPurpose::AttestKey),
        KeyParameter::NoAuthRequired,
    ];
    let attest_metadata = generate(&ks, &app(), &attest, &attest_params);
    let attest_cert = attest_metadata.certificate.expect("certificate");

    let mut params = ec_sign_key();
    params.push(KeyParameter::AttestationChallenge(b"challenge".to_vec()));
    let metadata = ks
        .level
        .generate_key(&app(), &KeyDescriptor::app("attested"), Some(&attest), &params, 0, &[])
        .expect("generate");
    assert_eq!(metadata.certificate_chain.as_ref(), Some(&attest_cert));

    let leaf = openssl::x509::X509::from_der(&metadata.certificate.expect("certificate"))
        .expect("leaf");
    let issuer = openssl::x509::X509::from_der(&attest_cert).expect("issuer");
    assert!(leaf
        .verify(&issuer.public_key().expect("public"))
        .expect("verify"));

    // Without an application id the challenge cannot be honored.
    assert_eq!(
        ks.level
            .generate_key(&other_app(), &KeyDescriptor::app("x"), None, &params, 0, &[])
            .err(),
        Some(Error::Rc(ResponseCode::GetAttestationApplicationIdFailed))
    );

    // Another app's attestation key is out of reach.
    assert_eq!(
        ks.level
            .generate_key(
                &other_app(),
                &KeyDescriptor::app("y"),
                Some(&attest_metadata.key),
                &ec_sign_key(),
                0,
                &[]
            )
            .err(),
        Some(Error::perm())
    );
}

#[test]
fn test_entropy_is_mixed() {
    let ks = keystore();
    let metadata = ks
        .level
        .generate_key(&app(), &KeyDescriptor::app("ec"), None, &ec_sign_key(), 0, &[7u8; 32])
        .expect("generate");
    assert_eq!(metadata.key.alias.as_deref(), Some("ec"));
}

#[test]
fn test_hardware_info() {
    let ks = keystore();
    let info = ks.level.hardware_info().expect("info");
    assert_eq!(info.security_level, SecurityLevel::TrustedEnvironment);
    assert_eq!(ks.level.security_level(), SecurityLevel::TrustedEnvironment);
    assert!(ks
        .service
        .get_security_level(SecurityLevel::TrustedEnvironment)
        .is_ok());
    assert_eq!(
        ks.service
            .get_security_level(SecurityLevel::StrongBox)
            .err(),
        Some(Error::Km(ErrorCode::HARDWARE_TYPE_UNAVAILABLE))
    );
}
