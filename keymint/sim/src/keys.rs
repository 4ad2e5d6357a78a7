// Copyright (C) Microsoft Corporation. All rights reserved.

//! Key generation, import and parameter validation.

use ks2_keymint_interface::Algorithm;
use ks2_keymint_interface::BlockMode;
use ks2_keymint_interface::Digest;
use ks2_keymint_interface::EcCurve;
use ks2_keymint_interface::ErrorCode;
use ks2_keymint_interface::KeyFormat;
use ks2_keymint_interface::KeyOrigin;
use ks2_keymint_interface::KeyParameter;
use ks2_keymint_interface::KeyParameterSet;
use ks2_keymint_interface::KmResult;
use ks2_keymint_interface::Tag;
use openssl::bn::BigNum;
use openssl::ec::EcGroup;
use openssl::ec::EcKey;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::Id;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use openssl::rsa::Rsa;

use crate::blob::KeyMaterial;
use crate::error::OsslResultExt;
use crate::patch_level::PatchLevels;
use crate::rng::EntropyPool;

const RSA_F4: u64 = 65537;

/// Tags that describe how a key was created rather than how it may be used.
const CREATION_ONLY_TAGS: &[Tag] = &[
    Tag::ApplicationId,
    Tag::ApplicationData,
    Tag::AttestationChallenge,
    Tag::AttestationApplicationId,
    Tag::CertificateSubject,
    Tag::CertificateSerial,
    Tag::CertificateNotBefore,
    Tag::CertificateNotAfter,
    Tag::Nonce,
    Tag::MacLength,
    Tag::Origin,
    Tag::OsVersion,
    Tag::OsPatchLevel,
    Tag::VendorPatchLevel,
    Tag::BootPatchLevel,
];

/// Converts a digest parameter to an OpenSSL digest.
pub(crate) fn message_digest(digest: Digest) -> KmResult<MessageDigest> {
    match digest {
        Digest::Md5 => Ok(MessageDigest::md5()),
        Digest::Sha1 => Ok(MessageDigest::sha1()),
        Digest::Sha224 => Ok(MessageDigest::sha224()),
        Digest::Sha256 => Ok(MessageDigest::sha256()),
        Digest::Sha384 => Ok(MessageDigest::sha384()),
        Digest::Sha512 => Ok(MessageDigest::sha512()),
        Digest::None => Err(ErrorCode::UNSUPPORTED_DIGEST),
    }
}

fn curve_nid(curve: EcCurve) -> Nid {
    match curve {
        EcCurve::P224 => Nid::SECP224R1,
        EcCurve::P256 => Nid::X9_62_PRIME256V1,
        EcCurve::P384 => Nid::SECP384R1,
        EcCurve::P521 => Nid::SECP521R1,
    }
}

fn curve_from_nid(nid: Nid) -> KmResult<EcCurve> {
    match nid {
        Nid::SECP224R1 => Ok(EcCurve::P224),
        Nid::X9_62_PRIME256V1 => Ok(EcCurve::P256),
        Nid::SECP384R1 => Ok(EcCurve::P384),
        Nid::SECP521R1 => Ok(EcCurve::P521),
        _ => Err(ErrorCode::UNSUPPORTED_EC_CURVE),
    }
}

fn curve_size(curve: EcCurve) -> u32 {
    match curve {
        EcCurve::P224 => 224,
        EcCurve::P256 => 256,
        EcCurve::P384 => 384,
        EcCurve::P521 => 521,
    }
}

fn curve_for_size(size: u32) -> KmResult<EcCurve> {
    match size {
        224 => Ok(EcCurve::P224),
        256 => Ok(EcCurve::P256),
        384 => Ok(EcCurve::P384),
        521 => Ok(EcCurve::P521),
        _ => Err(ErrorCode::UNSUPPORTED_KEY_SIZE),
    }
}

/// Loads the private key of an asymmetric key.
pub(crate) fn private_key(material: &KeyMaterial) -> KmResult<PKey<Private>> {
    match material {
        KeyMaterial::Ec(der) | KeyMaterial::Rsa(der) => {
            PKey::private_key_from_der(der).or_km(ErrorCode::INVALID_KEY_BLOB)
        }
        _ => Err(ErrorCode::INCOMPATIBLE_ALGORITHM),
    }
}

fn check_aes_size(size: u32) -> KmResult<()> {
    match size {
        128 | 192 | 256 => Ok(()),
        _ => Err(ErrorCode::UNSUPPORTED_KEY_SIZE),
    }
}

fn check_hmac_size(size: u32) -> KmResult<()> {
    if size < 64 || size > 512 || size % 8 != 0 {
        return Err(ErrorCode::UNSUPPORTED_KEY_SIZE);
    }
    Ok(())
}

/// Validates MAC related parameters of symmetric keys.
fn check_mac_params(algorithm: Algorithm, params: &[KeyParameter]) -> KmResult<()> {
    match algorithm {
        Algorithm::Aes => {
            if params.block_mode() == Some(BlockMode::Gcm) {
                let min = params
                    .min_mac_length()
                    .ok_or(ErrorCode::MISSING_MIN_MAC_LENGTH)?;
                if !(96..=128).contains(&min) || min % 8 != 0 {
                    return Err(ErrorCode::UNSUPPORTED_MIN_MAC_LENGTH);
                }
            }
            Ok(())
        }
        Algorithm::Hmac => {
            let digests = params.digests();
            let [digest] = digests.as_slice() else {
                return Err(ErrorCode::UNSUPPORTED_DIGEST);
            };
            let md = message_digest(*digest)?;
            let min = params
                .min_mac_length()
                .ok_or(ErrorCode::MISSING_MIN_MAC_LENGTH)?;
            if min < 64 || min % 8 != 0 || min as usize > md.size() * 8 {
                return Err(ErrorCode::UNSUPPORTED_MIN_MAC_LENGTH);
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// A freshly created key: its material and hardware enforced characteristics.
pub(crate) struct NewKey {
    pub(crate) material: KeyMaterial,
    pub(crate) characteristics: Vec<KeyParameter>,
}

/// Builds the hardware enforced characteristics of a key.
fn characteristics(
    params: &[KeyParameter],
    implied: Vec<KeyParameter>,
    origin: KeyOrigin,
    os_version: u32,
    levels: &PatchLevels,
) -> Vec<KeyParameter> {
    let mut chars: Vec<KeyParameter> = params
        .iter()
        .filter(|p| !CREATION_ONLY_TAGS.contains(&p.tag()))
        .cloned()
        .collect();
    for param in implied {
        if !chars.has_tag(param.tag()) {
            chars.push(param);
        }
    }
    chars.push(KeyParameter::Origin(origin));
    chars.push(KeyParameter::OsVersion(os_version));
    chars.extend(levels_to_params(levels));
    chars
}

/// Patch level tags for `levels`.
pub(crate) fn levels_to_params(levels: &PatchLevels) -> Vec<KeyParameter> {
    let mut params = Vec::new();
    if let Some(v) = levels.system {
        params.push(KeyParameter::OsPatchLevel(v));
    }
    if let Some(v) = levels.vendor {
        params.push(KeyParameter::VendorPatchLevel(v));
    }
    if let Some(v) = levels.boot {
        params.push(KeyParameter::BootPatchLevel(v));
    }
    params
}

/// Context shared by generate and import.
pub(crate) struct KeyFactory<'a> {
    pub(crate) rng: &'a EntropyPool,
    pub(crate) os_version: u32,
    pub(crate) levels: PatchLevels,
}

impl KeyFactory<'_> {
    /// Generates key material for `params`.
    pub(crate) fn generate(&self, params: &[KeyParameter]) -> KmResult<NewKey> {
        let algorithm = params.algorithm().ok_or(ErrorCode::UNSUPPORTED_ALGORITHM)?;
        check_mac_params(algorithm, params)?;
        let (material, implied) = match algorithm {
            Algorithm::Aes => {
                let size = params.key_size().ok_or(ErrorCode::UNSUPPORTED_KEY_SIZE)?;
                check_aes_size(size)?;
                let key = self.rng.bytes(size as usize / 8)?;
                (KeyMaterial::Aes(key), vec![])
            }
            Algorithm::Hmac => {
                let size = params.key_size().ok_or(ErrorCode::UNSUPPORTED_KEY_SIZE)?;
                check_hmac_size(size)?;
                let key = self.rng.bytes(size as usize / 8)?;
                (KeyMaterial::Hmac(key), vec![])
            }
            Algorithm::Ec => {
                let curve = match (params.ec_curve(), params.key_size()) {
                    (Some(curve), Some(size)) if curve_size(curve) != size => {
                        return Err(ErrorCode::INVALID_ARGUMENT)
                    }
                    (Some(curve), _) => curve,
                    (None, Some(size)) => curve_for_size(size)?,
                    (None, None) => return Err(ErrorCode::UNSUPPORTED_KEY_SIZE),
                };
                let group = EcGroup::from_curve_name(curve_nid(curve)).or_unknown()?;
                let ec = EcKey::generate(&group).or_unknown()?;
                let der = ec.private_key_to_der().or_unknown()?;
                (
                    KeyMaterial::Ec(der),
                    vec![
                        KeyParameter::EcCurve(curve),
                        KeyParameter::KeySize(curve_size(curve)),
                    ],
                )
            }
            Algorithm::Rsa => {
                let size = params.key_size().ok_or(ErrorCode::UNSUPPORTED_KEY_SIZE)?;
                if !(1024..=4096).contains(&size) || size % 8 != 0 {
                    return Err(ErrorCode::UNSUPPORTED_KEY_SIZE);
                }
                let exponent = params
                    .iter()
                    .find_map(|p| match p {
                        KeyParameter::RsaPublicExponent(e) => Some(*e),
                        _ => None,
                    })
                    .unwrap_or(RSA_F4);
                let e = BigNum::from_slice(&exponent.to_be_bytes()).or_unknown()?;
                let rsa = Rsa::generate_with_e(size, &e).or_km(ErrorCode::INVALID_ARGUMENT)?;
                let der = rsa.private_key_to_der().or_unknown()?;
                (
                    KeyMaterial::Rsa(der),
                    vec![KeyParameter::RsaPublicExponent(exponent)],
                )
            }
            Algorithm::TripleDes => return Err(ErrorCode::UNSUPPORTED_ALGORITHM),
        };
        Ok(NewKey {
            characteristics: characteristics(
                params,
                implied,
                KeyOrigin::Generated,
                self.os_version,
                &self.levels,
            ),
            material,
        })
    }

    /// Validates and wraps imported key material.
    pub(crate) fn import(
        &self,
        params: &[KeyParameter],
        format: KeyFormat,
        key_data: &[u8],
        origin: KeyOrigin,
    ) -> KmResult<NewKey> {
        let algorithm = params.algorithm().ok_or(ErrorCode::UNSUPPORTED_ALGORITHM)?;
        check_mac_params(algorithm, params)?;
        let declared_size = params.key_size();
        let size_matches = |actual: u32| declared_size.map_or(true, |s| s == actual);

        let (material, implied) = match (algorithm, format) {
            (Algorithm::Aes | Algorithm::Hmac, KeyFormat::Raw) => {
                let size = key_data.len() as u32 * 8;
                if !size_matches(size) {
                    return Err(ErrorCode::IMPORT_PARAMETER_MISMATCH);
                }
                let material = if algorithm == Algorithm::Aes {
                    check_aes_size(size)?;
                    KeyMaterial::Aes(key_data.to_vec())
                } else {
                    check_hmac_size(size)?;
                    KeyMaterial::Hmac(key_data.to_vec())
                };
                (material, vec![KeyParameter::KeySize(size)])
            }
            (Algorithm::Ec, KeyFormat::Pkcs8) => {
                let pkey = PKey::private_key_from_pkcs8(key_data)
                    .or_km(ErrorCode::INVALID_ARGUMENT)?;
                if pkey.id() != Id::EC {
                    return Err(ErrorCode::IMPORT_PARAMETER_MISMATCH);
                }
                let ec = pkey.ec_key().or_unknown()?;
                let curve = ec
                    .group()
                    .curve_name()
                    .ok_or(ErrorCode::UNSUPPORTED_EC_CURVE)
                    .and_then(curve_from_nid)?;
                if !size_matches(curve_size(curve))
                    || params.ec_curve().is_some_and(|c| c != curve)
                {
                    return Err(ErrorCode::IMPORT_PARAMETER_MISMATCH);
                }
                (
                    KeyMaterial::Ec(ec.private_key_to_der().or_unknown()?),
                    vec![
                        KeyParameter::EcCurve(curve),
                        KeyParameter::KeySize(curve_size(curve)),
                    ],
                )
            }
            (Algorithm::Rsa, KeyFormat::Pkcs8) => {
                let pkey = PKey::private_key_from_pkcs8(key_data)
                    .or_km(ErrorCode::INVALID_ARGUMENT)?;
                if pkey.id() != Id::RSA {
                    return Err(ErrorCode::IMPORT_PARAMETER_MISMATCH);
                }
                let rsa = pkey.rsa().or_unknown()?;
                let size = rsa.size() * 8;
                if !size_matches(size) {
                    return Err(ErrorCode::IMPORT_PARAMETER_MISMATCH);
                }
                let exponent = rsa
                    .e()
                    .to_vec()
                    .iter()
                    .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
                (
                    KeyMaterial::Rsa(rsa.private_key_to_der().or_unknown()?),
                    vec![
                        KeyParameter::KeySize(size),
                        KeyParameter::RsaPublicExponent(exponent),
                    ],
                )
            }
            (Algorithm::TripleDes, _) => return Err(ErrorCode::UNSUPPORTED_ALGORITHM),
            _ => return Err(ErrorCode::UNSUPPORTED_KEY_FORMAT),
        };
        Ok(NewKey {
            characteristics: characteristics(
                params,
                implied,
                origin,
                self.os_version,
                &self.levels,
            ),
            material,
        })
    }
}
