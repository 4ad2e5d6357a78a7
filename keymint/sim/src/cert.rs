// Copyright (C) Microsoft Corporation. All rights reserved.

//! X.509 certificates for asymmetric keys.

use ks2_keymint_interface::ErrorCode;
use ks2_keymint_interface::KeyParameter;
use ks2_keymint_interface::KeyParameterSet;
use ks2_keymint_interface::KmResult;
use openssl::asn1::Asn1Integer;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::pkey::PKeyRef;
use openssl::pkey::Private;
use openssl::x509::X509Builder;
use openssl::x509::X509Name;
use openssl::x509::X509NameBuilder;

use crate::error::OsslResultExt;

/// 9999-12-31T23:59:59Z, the "no expiry" date of RFC 5280.
const UNDEFINED_EXPIRATION_SECS: i64 = 253_402_300_799;

const DEFAULT_SUBJECT_CN: &str = "Android Keystore Key";

/// Who signs a new certificate.
pub(crate) enum CertSigner<'a> {
    /// The subject key itself
    SelfSigned,

    /// An attestation key and the DER subject of its certificate
    AttestKey {
        key: &'a PKeyRef<Private>,
        issuer: &'a [u8],
    },
}

fn default_subject() -> KmResult<X509Name> {
    let mut name = X509NameBuilder::new().or_unknown()?;
    name.append_entry_by_text("CN", DEFAULT_SUBJECT_CN)
        .or_unknown()?;
    Ok(name.build())
}

fn serial(params: &[KeyParameter]) -> KmResult<Asn1Integer> {
    let bytes = params
        .iter()
        .find_map(|p| match p {
            KeyParameter::CertificateSerial(s) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_else(|| vec![1]);
    BigNum::from_slice(&bytes)
        .and_then(|bn| bn.to_asn1_integer())
        .or_km(ErrorCode::INVALID_ARGUMENT)
}

fn time_param(params: &[KeyParameter], before: bool) -> Option<i64> {
    params.iter().find_map(|p| match (p, before) {
        (KeyParameter::CertificateNotBefore(ms), true) => Some(ms / 1000),
        (KeyParameter::CertificateNotAfter(ms), false) => Some(ms / 1000),
        _ => None,
    })
}

/// Builds a DER certificate for `key`.
///
/// # Arguments
/// * `key` - Subject key
/// * `params` - Creation parameters (subject, serial, validity)
/// * `signer` - Signing key
pub(crate) fn make_certificate(
    key: &PKey<Private>,
    params: &[KeyParameter],
    signer: CertSigner<'_>,
) -> KmResult<Vec<u8>> {
    let subject = match params.certificate_subject() {
        Some(der) if !der.is_empty() => {
            X509Name::from_der(&der).or_km(ErrorCode::INVALID_ARGUMENT)?
        }
        _ => default_subject()?,
    };
    let not_before = Asn1Time::from_unix(time_param(params, true).unwrap_or(0)).or_unknown()?;
    let not_after = Asn1Time::from_unix(
        time_param(params, false).unwrap_or(UNDEFINED_EXPIRATION_SECS),
    )
    .or_unknown()?;

    let mut builder = X509Builder::new().or_unknown()?;
    builder.set_version(2).or_unknown()?;
    builder.set_serial_number(&*serial(params)?).or_unknown()?;
    builder.set_subject_name(&subject).or_unknown()?;
    builder.set_pubkey(key).or_unknown()?;
    builder.set_not_before(&not_before).or_unknown()?;
    builder.set_not_after(&not_after).or_unknown()?;

    match signer {
        CertSigner::SelfSigned => {
            builder.set_issuer_name(&subject).or_unknown()?;
            builder.sign(key, MessageDigest::sha256()).or_unknown()?;
        }
        CertSigner::AttestKey { key: attest, issuer } => {
            let issuer = X509Name::from_der(issuer).or_km(ErrorCode::INVALID_ARGUMENT)?;
            builder.set_issuer_name(&issuer).or_unknown()?;
            builder.sign(attest, MessageDigest::sha256()).or_unknown()?;
        }
    }
    builder.build().to_der().or_unknown()
}

#[cfg(test)]
mod tests {
    use openssl::ec::EcGroup;
    use openssl::ec::EcKey;
    use openssl::nid::Nid;
    use openssl::x509::X509;
    use test_with_tracing::test;

    use super::*;

    fn ec_key() -> PKey<Private> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).expect("group");
        PKey::from_ec_key(EcKey::generate(&group).expect("ec")).expect("pkey")
    }

    #[test]
    fn test_self_signed() {
        let key = ec_key();
        let der = make_certificate(&key, &[], CertSigner::SelfSigned).expect("cert");
        let cert = X509::from_der(&der).expect("parse");
        assert!(cert.verify(&key).expect("verify"));
    }

    #[test]
    fn test_signed_by_attest_key() {
        let key = ec_key();
        let attest = ec_key();
        let mut issuer = X509NameBuilder::new().expect("builder");
        issuer.append_entry_by_text("CN", "Attest").expect("cn");
        let issuer = issuer.build().to_der().expect("der");
        let params = vec![KeyParameter::CertificateSerial(vec![0x42])];

        let der = make_certificate(
            &key,
            &params,
            CertSigner::AttestKey {
                key: &attest,
                issuer: &issuer,
            },
        )
        .expect("cert");
        let cert = X509::from_der(&der).expect("parse");
        assert!(cert.verify(&attest).expect("verify"));
        assert!(!cert.verify(&key).expect("verify"));
        assert_eq!(cert.issuer_name().to_der().expect("der"), issuer);
    }
}
