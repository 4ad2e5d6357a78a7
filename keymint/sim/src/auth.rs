// Copyright (C) Microsoft Corporation. All rights reserved.

//! User authentication checks for auth-bound keys.

use ks2_keymint_interface::ErrorCode;
use ks2_keymint_interface::HardwareAuthToken;
use ks2_keymint_interface::HardwareAuthenticatorType;
use ks2_keymint_interface::KeyParameter;
use ks2_keymint_interface::KeyParameterSet;
use ks2_keymint_interface::KmResult;

/// Authorization requirement of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AuthRequirement {
    /// Key is not auth-bound, or a token was already accepted
    Satisfied,

    /// A token is still needed
    Pending {
        sids: Vec<i64>,
        auth_type: HardwareAuthenticatorType,
        /// Token must carry the operation challenge
        per_op: bool,
        challenge: i64,
    },
}

impl AuthRequirement {
    /// Derives the requirement from key characteristics.
    pub(crate) fn for_key(characteristics: &[KeyParameter], challenge: i64) -> Self {
        if !characteristics.is_auth_bound() {
            return AuthRequirement::Satisfied;
        }
        AuthRequirement::Pending {
            sids: characteristics.user_secure_ids(),
            auth_type: characteristics
                .user_auth_type()
                .unwrap_or(HardwareAuthenticatorType::NONE),
            per_op: characteristics.auth_timeout().is_none(),
            challenge,
        }
    }

    fn accepts(&self, token: &HardwareAuthToken) -> bool {
        match self {
            AuthRequirement::Satisfied => true,
            AuthRequirement::Pending {
                sids,
                auth_type,
                per_op,
                challenge,
            } => {
                let sid_ok = sids.contains(&token.user_id) || sids.contains(&token.authenticator_id);
                let type_ok = auth_type.intersects(token.authenticator_type);
                let challenge_ok = !per_op || token.challenge == *challenge;
                sid_ok && type_ok && challenge_ok
            }
        }
    }

    /// Consumes `token` if it satisfies the requirement.
    ///
    /// Returns `Ok` once satisfied; later calls need no token.
    ///
    /// # Error
    /// * `ErrorCode::KEY_USER_NOT_AUTHENTICATED` - No acceptable token
    pub(crate) fn authorize(&mut self, token: Option<&HardwareAuthToken>) -> KmResult<()> {
        if *self == AuthRequirement::Satisfied {
            return Ok(());
        }
        match token {
            Some(token) if self.accepts(token) => {
                *self = AuthRequirement::Satisfied;
                Ok(())
            }
            _ => Err(ErrorCode::KEY_USER_NOT_AUTHENTICATED),
        }
    }

    /// Like [`Self::authorize`], but a missing or mismatched token leaves the
    /// requirement pending instead of failing.
    pub(crate) fn try_authorize(&mut self, token: Option<&HardwareAuthToken>) {
        let _ = self.authorize(token);
    }
}
