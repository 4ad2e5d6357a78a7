// Copyright (C) Microsoft Corporation. All rights reserved.

//! Mapping of library failures onto KeyMint error codes.

use ks2_keymint_interface::ErrorCode;
use ks2_keymint_interface::KmResult;
use openssl::error::ErrorStack;

/// Converts an OpenSSL result into a KeyMint result.
pub(crate) trait OsslResultExt<T> {
    /// Maps any OpenSSL failure onto `code`.
    fn or_km(self, code: ErrorCode) -> KmResult<T>;

    /// Maps any OpenSSL failure onto `ErrorCode::UNKNOWN_ERROR`.
    fn or_unknown(self) -> KmResult<T>
    where
        Self: Sized,
    {
        self.or_km(ErrorCode::UNKNOWN_ERROR)
    }
}

impl<T> OsslResultExt<T> for Result<T, ErrorStack> {
    fn or_km(self, code: ErrorCode) -> KmResult<T> {
        self.map_err(|err| {
            tracing::debug!(error = %err, ?code, "openssl failure");
            code
        })
    }
}
