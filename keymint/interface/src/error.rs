// Copyright (C) Microsoft Corporation. All rights reserved.

//! KeyMint error codes.

use thiserror::Error;

/// Error reported by a KeyMint backend.
///
/// The wrapped value is the signed KeyMint code. All error codes are
/// negative; they are passed to clients unchanged.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[error("keymint error {0}")]
pub struct ErrorCode(pub i32);

macro_rules! error_codes {
    ($($name:ident = $value:literal,)*) => {
        impl ErrorCode {
            $(
                #[allow(missing_docs)]
                pub const $name: ErrorCode = ErrorCode($value);
            )*

            /// Returns the symbolic name of a known code.
            pub fn name(&self) -> Option<&'static str> {
                match self.0 {
                    $($value => Some(stringify!($name)),)*
                    _ => None,
                }
            }
        }
    };
}

error_codes! {
    ROOT_OF_TRUST_ALREADY_SET = -1,
    UNSUPPORTED_PURPOSE = -2,
    INCOMPATIBLE_PURPOSE = -3,
    UNSUPPORTED_ALGORITHM = -4,
    INCOMPATIBLE_ALGORITHM = -5,
    UNSUPPORTED_KEY_SIZE = -6,
    UNSUPPORTED_BLOCK_MODE = -7,
    INCOMPATIBLE_BLOCK_MODE = -8,
    UNSUPPORTED_MAC_LENGTH = -9,
    UNSUPPORTED_PADDING_MODE = -10,
    INCOMPATIBLE_PADDING_MODE = -11,
    UNSUPPORTED_DIGEST = -12,
    INCOMPATIBLE_DIGEST = -13,
    INVALID_USER_ID = -15,
    UNSUPPORTED_KEY_FORMAT = -17,
    INCOMPATIBLE_KEY_FORMAT = -18,
    INVALID_INPUT_LENGTH = -21,
    KEY_USER_NOT_AUTHENTICATED = -26,
    INVALID_OPERATION_HANDLE = -28,
    VERIFICATION_FAILED = -30,
    TOO_MANY_OPERATIONS = -31,
    INVALID_KEY_BLOB = -33,
    IMPORTED_KEY_DECRYPTION_FAILED = -35,
    INVALID_ARGUMENT = -38,
    UNSUPPORTED_TAG = -39,
    INVALID_TAG = -40,
    IMPORT_PARAMETER_MISMATCH = -44,
    UNSUPPORTED_EC_FIELD = -50,
    MISSING_NONCE = -51,
    INVALID_NONCE = -52,
    MISSING_MAC_LENGTH = -53,
    CALLER_NONCE_PROHIBITED = -55,
    INVALID_MAC_LENGTH = -57,
    MISSING_MIN_MAC_LENGTH = -58,
    UNSUPPORTED_MIN_MAC_LENGTH = -59,
    UNSUPPORTED_EC_CURVE = -61,
    KEY_REQUIRES_UPGRADE = -62,
    ATTESTATION_CHALLENGE_MISSING = -63,
    ATTESTATION_APPLICATION_ID_MISSING = -65,
    HARDWARE_TYPE_UNAVAILABLE = -68,
    INVALID_OPERATION = -76,
    STORAGE_KEY_UNSUPPORTED = -77,
    UNIMPLEMENTED = -100,
    UNKNOWN_ERROR = -1000,
}
