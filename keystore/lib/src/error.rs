// Copyright (C) Microsoft Corporation. All rights reserved.

use ks2_keymint_interface::ErrorCode;
use openssl::error::ErrorStack;
use thiserror::Error;

/// Service-layer response codes.
///
/// Values 1, 5, 9-16 and 22 are reserved and never produced.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    /// The user's keys are locked
    Locked = 2,

    /// The user has no lock screen knowledge factor
    Uninitialized = 3,

    /// Unexpected internal failure
    SystemError = 4,

    /// Access check failed
    PermissionDenied = 6,

    /// Descriptor refers to no key
    KeyNotFound = 7,

    /// Stored data failed integrity checks
    ValueCorrupted = 8,

    /// Key can never be used again
    KeyPermanentlyInvalidated = 17,

    /// No operation slot could be freed
    BackendBusy = 18,

    /// Concurrent call on the same operation
    OperationBusy = 19,

    /// Malformed request
    InvalidArgument = 20,

    /// More than 32 KiB in a single call
    TooMuchData = 21,

    /// Attestation key pool needs a system upgrade
    OutOfKeysRequiresSystemUpgrade = 23,

    /// Attestation key pool is waiting for connectivity
    OutOfKeysPendingInternetConnectivity = 24,

    /// Attestation key pool failed transiently
    OutOfKeysTransientError = 25,

    /// Attestation key pool failed permanently
    OutOfKeysPermanentError = 26,

    /// Attestation application id lookup failed
    GetAttestationApplicationIdFailed = 27,

    /// Requested information is absent
    InfoNotAvailable = 28,
}

/// Keystore Error
///
/// Service errors are positive response codes; backend errors are negative
/// KeyMint codes and pass through unchanged.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Service-layer error
    #[error("response code {0:?}")]
    Rc(ResponseCode),

    /// Backend error
    #[error(transparent)]
    Km(#[from] ErrorCode),
}

impl From<ResponseCode> for Error {
    fn from(rc: ResponseCode) -> Self {
        Error::Rc(rc)
    }
}

impl From<ErrorStack> for Error {
    fn from(err: ErrorStack) -> Self {
        tracing::error!(error = %err, "openssl failure");
        Error::Rc(ResponseCode::SystemError)
    }
}

impl Error {
    /// `SYSTEM_ERROR`
    pub fn sys() -> Self {
        Error::Rc(ResponseCode::SystemError)
    }

    /// `PERMISSION_DENIED`
    pub fn perm() -> Self {
        Error::Rc(ResponseCode::PermissionDenied)
    }

    /// `KEY_NOT_FOUND`
    pub fn not_found() -> Self {
        Error::Rc(ResponseCode::KeyNotFound)
    }

    /// `INVALID_ARGUMENT` at the service layer
    pub fn invalid_arg() -> Self {
        Error::Rc(ResponseCode::InvalidArgument)
    }

    /// Flattens the error to the signed code seen by clients.
    pub fn service_specific_code(&self) -> i32 {
        match self {
            Error::Rc(rc) => *rc as i32,
            Error::Km(ErrorCode(code)) => *code,
        }
    }

    /// Whether the client may retry the same request after a back-off.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Rc(
                ResponseCode::BackendBusy
                    | ResponseCode::OperationBusy
                    | ResponseCode::OutOfKeysTransientError
                    | ResponseCode::OutOfKeysPendingInternetConnectivity
                    | ResponseCode::GetAttestationApplicationIdFailed
            )
        )
    }
}

/// Keystore Result
pub type KsResult<T> = Result<T, Error>;
