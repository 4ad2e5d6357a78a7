// Copyright (C) Microsoft Corporation. All rights reserved.

//! Key parameter model.

use serde::Deserialize;
use serde::Serialize;

/// Key algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum Algorithm {
    /// RSA
    Rsa = 1,

    /// Elliptic curve
    Ec = 3,

    /// AES
    Aes = 32,

    /// Triple DES
    TripleDes = 33,

    /// HMAC
    Hmac = 128,
}

impl Algorithm {
    /// Whether the algorithm has a public/private key pair.
    pub fn is_asymmetric(&self) -> bool {
        matches!(self, Algorithm::Rsa | Algorithm::Ec)
    }
}

/// Key purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum KeyPurpose {
    /// Encrypt
    Encrypt = 0,

    /// Decrypt
    Decrypt = 1,

    /// Sign
    Sign = 2,

    /// Verify
    Verify = 3,

    /// Unwrap a securely imported key
    WrapKey = 5,

    /// Key agreement
    AgreeKey = 6,

    /// Sign attestation certificates
    AttestKey = 7,
}

/// Block cipher mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum BlockMode {
    /// ECB
    Ecb = 1,

    /// CBC
    Cbc = 2,

    /// CTR
    Ctr = 3,

    /// GCM
    Gcm = 32,
}

/// Padding mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum PaddingMode {
    /// No padding
    None = 1,

    /// RSA OAEP
    RsaOaep = 2,

    /// RSA PSS
    RsaPss = 3,

    /// RSA PKCS#1 v1.5 encryption padding
    RsaPkcs115Encrypt = 4,

    /// RSA PKCS#1 v1.5 signature padding
    RsaPkcs115Sign = 5,

    /// PKCS#7
    Pkcs7 = 64,
}

/// Message digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum Digest {
    /// No digest
    None = 0,

    /// MD5
    Md5 = 1,

    /// SHA-1
    Sha1 = 2,

    /// SHA-224
    Sha224 = 3,

    /// SHA-256
    Sha256 = 4,

    /// SHA-384
    Sha384 = 5,

    /// SHA-512
    Sha512 = 6,
}

/// Elliptic curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum EcCurve {
    /// NIST P-224
    P224 = 0,

    /// NIST P-256
    P256 = 1,

    /// NIST P-384
    P384 = 2,

    /// NIST P-521
    P521 = 3,
}

/// Where a key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum KeyOrigin {
    /// Generated in the backend
    Generated = 0,

    /// Derived in the backend
    Derived = 1,

    /// Imported in the clear
    Imported = 2,

    /// Imported wrapped
    SecurelyImported = 4,
}

/// Bit set of authenticator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct HardwareAuthenticatorType(pub i32);

impl HardwareAuthenticatorType {
    /// No authenticator
    pub const NONE: Self = Self(0);

    /// Password / PIN / pattern
    pub const PASSWORD: Self = Self(1);

    /// Fingerprint or other biometric
    pub const FINGERPRINT: Self = Self(1 << 1);

    /// Any authenticator
    pub const ANY: Self = Self(-1);

    /// Returns true if the two sets share at least one authenticator.
    pub fn intersects(&self, other: HardwareAuthenticatorType) -> bool {
        self.0 & other.0 != 0
    }
}

/// Security level of a backend or of a key characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum SecurityLevel {
    /// Software only
    Software = 0,

    /// Trusted execution environment
    TrustedEnvironment = 1,

    /// Discrete secure element
    StrongBox = 2,

    /// Enforced by the keystore service
    Keystore = 100,
}

/// Import format of key material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum KeyFormat {
    /// X.509 SubjectPublicKeyInfo
    X509 = 0,

    /// PKCS#8 PrivateKeyInfo
    Pkcs8 = 1,

    /// Raw symmetric key bits
    Raw = 3,
}

/// Tag of a [`KeyParameter`], without its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Tag {
    Purpose,
    Algorithm,
    KeySize,
    BlockMode,
    Digest,
    Padding,
    CallerNonce,
    MinMacLength,
    EcCurve,
    RsaPublicExponent,
    NoAuthRequired,
    UserSecureId,
    UserAuthType,
    AuthTimeout,
    ApplicationId,
    ApplicationData,
    CreationDateTime,
    Origin,
    OsVersion,
    OsPatchLevel,
    VendorPatchLevel,
    BootPatchLevel,
    AttestationChallenge,
    AttestationApplicationId,
    Nonce,
    MacLength,
    StorageKey,
    CertificateSubject,
    CertificateSerial,
    CertificateNotBefore,
    CertificateNotAfter,
    UserId,
}

/// A single tagged key attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum KeyParameter {
    Purpose(KeyPurpose),
    Algorithm(Algorithm),
    KeySize(u32),
    BlockMode(BlockMode),
    Digest(Digest),
    Padding(PaddingMode),
    CallerNonce,
    MinMacLength(u32),
    EcCurve(EcCurve),
    RsaPublicExponent(u64),
    NoAuthRequired,
    UserSecureId(i64),
    UserAuthType(HardwareAuthenticatorType),
    AuthTimeout(u32),
    ApplicationId(Vec<u8>),
    ApplicationData(Vec<u8>),
    CreationDateTime(i64),
    Origin(KeyOrigin),
    OsVersion(u32),
    OsPatchLevel(u32),
    VendorPatchLevel(u32),
    BootPatchLevel(u32),
    AttestationChallenge(Vec<u8>),
    AttestationApplicationId(Vec<u8>),
    Nonce(Vec<u8>),
    MacLength(u32),
    StorageKey,
    CertificateSubject(Vec<u8>),
    CertificateSerial(Vec<u8>),
    CertificateNotBefore(i64),
    CertificateNotAfter(i64),
    UserId(u32),
}

impl KeyParameter {
    /// Returns the tag of this parameter.
    pub fn tag(&self) -> Tag {
        match self {
            KeyParameter::Purpose(_) => Tag::Purpose,
            KeyParameter::Algorithm(_) => Tag::Algorithm,
            KeyParameter::KeySize(_) => Tag::KeySize,
            KeyParameter::BlockMode(_) => Tag::BlockMode,
            KeyParameter::Digest(_) => Tag::Digest,
            KeyParameter::Padding(_) => Tag::Padding,
            KeyParameter::CallerNonce => Tag::CallerNonce,
            KeyParameter::MinMacLength(_) => Tag::MinMacLength,
            KeyParameter::EcCurve(_) => Tag::EcCurve,
            KeyParameter::RsaPublicExponent(_) => Tag::RsaPublicExponent,
            KeyParameter::NoAuthRequired => Tag::NoAuthRequired,
            KeyParameter::UserSecureId(_) => Tag::UserSecureId,
            KeyParameter::UserAuthType(_) => Tag::UserAuthType,
            KeyParameter::AuthTimeout(_) => Tag::AuthTimeout,
            KeyParameter::ApplicationId(_) => Tag::ApplicationId,
            KeyParameter::ApplicationData(_) => Tag::ApplicationData,
            KeyParameter::CreationDateTime(_) => Tag::CreationDateTime,
            KeyParameter::Origin(_) => Tag::Origin,
            KeyParameter::OsVersion(_) => Tag::OsVersion,
            KeyParameter::OsPatchLevel(_) => Tag::OsPatchLevel,
            KeyParameter::VendorPatchLevel(_) => Tag::VendorPatchLevel,
            KeyParameter::BootPatchLevel(_) => Tag::BootPatchLevel,
            KeyParameter::AttestationChallenge(_) => Tag::AttestationChallenge,
            KeyParameter::AttestationApplicationId(_) => Tag::AttestationApplicationId,
            KeyParameter::Nonce(_) => Tag::Nonce,
            KeyParameter::MacLength(_) => Tag::MacLength,
            KeyParameter::StorageKey => Tag::StorageKey,
            KeyParameter::CertificateSubject(_) => Tag::CertificateSubject,
            KeyParameter::CertificateSerial(_) => Tag::CertificateSerial,
            KeyParameter::CertificateNotBefore(_) => Tag::CertificateNotBefore,
            KeyParameter::CertificateNotAfter(_) => Tag::CertificateNotAfter,
            KeyParameter::UserId(_) => Tag::UserId,
        }
    }
}

macro_rules! single_value {
    ($(#[$doc:meta])* $fn_name:ident, $variant:ident, $ty:ty) => {
        $(#[$doc])*
        fn $fn_name(&self) -> Option<$ty> {
            self.as_params().iter().find_map(|p| match p {
                KeyParameter::$variant(v) => Some(v.clone()),
                _ => None,
            })
        }
    };
}

/// Typed lookups over a parameter list.
///
/// Single-valued tags return the first occurrence; repeatable tags return all
/// occurrences in order.
pub trait KeyParameterSet {
    /// Underlying parameters.
    fn as_params(&self) -> &[KeyParameter];

    /// Returns true if any parameter carries `tag`.
    fn has_tag(&self, tag: Tag) -> bool {
        self.as_params().iter().any(|p| p.tag() == tag)
    }

    /// All declared purposes.
    fn purposes(&self) -> Vec<KeyPurpose> {
        self.as_params()
            .iter()
            .filter_map(|p| match p {
                KeyParameter::Purpose(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    /// All declared digests.
    fn digests(&self) -> Vec<Digest> {
        self.as_params()
            .iter()
            .filter_map(|p| match p {
                KeyParameter::Digest(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    /// All declared user secure ids.
    fn user_secure_ids(&self) -> Vec<i64> {
        self.as_params()
            .iter()
            .filter_map(|p| match p {
                KeyParameter::UserSecureId(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    single_value!(
        /// Key algorithm.
        algorithm, Algorithm, Algorithm
    );
    single_value!(
        /// Key size in bits.
        key_size, KeySize, u32
    );
    single_value!(
        /// Block mode.
        block_mode, BlockMode, BlockMode
    );
    single_value!(
        /// First digest.
        digest, Digest, Digest
    );
    single_value!(
        /// Padding mode.
        padding, Padding, PaddingMode
    );
    single_value!(
        /// EC curve.
        ec_curve, EcCurve, EcCurve
    );
    single_value!(
        /// Minimum MAC length in bits.
        min_mac_length, MinMacLength, u32
    );
    single_value!(
        /// Requested MAC length in bits.
        mac_length, MacLength, u32
    );
    single_value!(
        /// Nonce / IV.
        nonce, Nonce, Vec<u8>
    );
    single_value!(
        /// Authenticator types accepted for this key.
        user_auth_type, UserAuthType, HardwareAuthenticatorType
    );
    single_value!(
        /// Auth validity window in seconds.
        auth_timeout, AuthTimeout, u32
    );
    single_value!(
        /// OS patch level the key was bound to.
        os_patch_level, OsPatchLevel, u32
    );
    single_value!(
        /// Attestation challenge.
        attestation_challenge, AttestationChallenge, Vec<u8>
    );
    single_value!(
        /// Certificate subject (DER encoded X.509 name).
        certificate_subject, CertificateSubject, Vec<u8>
    );
    single_value!(
        /// Key origin.
        origin, Origin, KeyOrigin
    );

    /// Whether the key requires user authentication.
    fn is_auth_bound(&self) -> bool {
        !self.has_tag(Tag::NoAuthRequired) && self.has_tag(Tag::UserSecureId)
    }
}

impl KeyParameterSet for [KeyParameter] {
    fn as_params(&self) -> &[KeyParameter] {
        self
    }
}

impl KeyParameterSet for Vec<KeyParameter> {
    fn as_params(&self) -> &[KeyParameter] {
        self
    }
}
