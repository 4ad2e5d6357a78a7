// Copyright (C) Microsoft Corporation. All rights reserved.

//! User authentication enforcement for auth-bound keys.

use std::time::Duration;
use std::time::Instant;

use ks2_keymint_interface::HardwareAuthToken;
use ks2_keymint_interface::HardwareAuthenticatorType;
use ks2_keymint_interface::KeyParameter;
use ks2_keymint_interface::KeyParameterSet;
use parking_lot::Mutex;

/// The oldest token is evicted beyond this count.
const MAX_CACHED_TOKENS: usize = 32;

struct CachedToken {
    token: HardwareAuthToken,
    received: Instant,
}

/// Auth tokens received from the authentication subsystem.
pub(crate) struct AuthTokenCache {
    tokens: Mutex<Vec<CachedToken>>,
}

impl AuthTokenCache {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(Vec::new()),
        }
    }

    /// Caches `token`, replacing an older token of the same authenticator
    /// and challenge.
    pub fn add(&self, token: HardwareAuthToken) {
        let mut tokens = self.tokens.lock();
        tokens.retain(|t| {
            !(t.token.user_id == token.user_id
                && t.token.authenticator_id == token.authenticator_id
                && t.token.authenticator_type == token.authenticator_type
                && t.token.challenge == token.challenge)
        });
        if tokens.len() >= MAX_CACHED_TOKENS {
            tokens.remove(0);
        }
        tracing::debug!(
            user_id = token.user_id,
            challenge = token.challenge,
            "auth token added"
        );
        tokens.push(CachedToken {
            token,
            received: Instant::now(),
        });
    }

    fn find(
        &self,
        pred: impl Fn(&CachedToken) -> bool,
    ) -> Option<HardwareAuthToken> {
        self.tokens
            .lock()
            .iter()
            .rev()
            .find(|t| pred(t))
            .map(|t| t.token.clone())
    }
}

/// Authentication an operation still needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AuthRequirement {
    /// A token carrying the operation challenge
    PerOperation {
        challenge: i64,
        sids: Vec<i64>,
        auth_type: HardwareAuthenticatorType,
    },

    /// A token no older than `timeout`
    TimeBound {
        timeout: Duration,
        sids: Vec<i64>,
        auth_type: HardwareAuthenticatorType,
    },
}

impl AuthRequirement {
    /// Requirement for a key with `characteristics`, or `None` if the key is
    /// not auth-bound.
    pub fn for_key(characteristics: &[KeyParameter], challenge: i64) -> Option<Self> {
        if !characteristics.is_auth_bound() {
            return None;
        }
        let sids = characteristics.user_secure_ids();
        let auth_type = characteristics
            .user_auth_type()
            .unwrap_or(HardwareAuthenticatorType::NONE);
        Some(match characteristics.auth_timeout() {
            Some(secs) => AuthRequirement::TimeBound {
                timeout: Duration::from_secs(secs as u64),
                sids,
                auth_type,
            },
            None => AuthRequirement::PerOperation {
                challenge,
                sids,
                auth_type,
            },
        })
    }

    /// Binds a per-operation requirement to the challenge issued at begin.
    pub fn with_challenge(self, challenge: i64) -> Self {
        match self {
            AuthRequirement::PerOperation {
                sids, auth_type, ..
            } => AuthRequirement::PerOperation {
                challenge,
                sids,
                auth_type,
            },
            time_bound => time_bound,
        }
    }

    fn matches(&self, cached: &CachedToken, now: Instant) -> bool {
        let (sids, auth_type) = match self {
            AuthRequirement::PerOperation {
                sids, auth_type, ..
            }
            | AuthRequirement::TimeBound {
                sids, auth_type, ..
            } => (sids, auth_type),
        };
        let token = &cached.token;
        let sid_ok = sids.contains(&token.user_id) || sids.contains(&token.authenticator_id);
        if !sid_ok || !auth_type.intersects(token.authenticator_type) {
            return false;
        }
        match self {
            AuthRequirement::PerOperation { challenge, .. } => token.challenge == *challenge,
            AuthRequirement::TimeBound { timeout, .. } => {
                now.saturating_duration_since(cached.received) <= *timeout
            }
        }
    }

    /// Finds a cached token that satisfies the requirement.
    pub fn find_token(&self, cache: &AuthTokenCache) -> Option<HardwareAuthToken> {
        let now = Instant::now();
        cache.find(|t| self.matches(t, now))
    }
}

#[cfg(test)]
mod tests {
    use test_with_tracing::test;

    use super::*;

    fn token(challenge: i64, user_id: i64) -> HardwareAuthToken {
        HardwareAuthToken {
            challenge,
            user_id,
            authenticator_type: HardwareAuthenticatorType::PASSWORD,
            ..Default::default()
        }
    }

    fn bound_key(timeout: Option<u32>) -> Vec<KeyParameter> {
        let mut params = vec![
            KeyParameter::UserSecureId(77),
            KeyParameter::UserAuthType(HardwareAuthenticatorType::PASSWORD),
        ];
        if let Some(secs) = timeout {
            params.push(KeyParameter::AuthTimeout(secs));
        }
        params
    }

    #[test]
    fn test_not_bound() {
        assert_eq!(
            AuthRequirement::for_key(&[KeyParameter::NoAuthRequired], 1),
            None
        );
    }

    #[test]
    fn test_per_operation_challenge() {
        let cache = AuthTokenCache::new();
        let req = AuthRequirement::for_key(&bound_key(None), 42).expect("bound");
        assert_eq!(req.find_token(&cache), None);
        cache.add(token(41, 77));
        assert_eq!(req.find_token(&cache), None);
        cache.add(token(42, 78));
        assert_eq!(req.find_token(&cache), None);
        cache.add(token(42, 77));
        assert_eq!(req.find_token(&cache), Some(token(42, 77)));
    }

    #[test]
    fn test_time_bound_freshness() {
        let cache = AuthTokenCache::new();
        cache.add(token(0, 77));
        let fresh = AuthRequirement::for_key(&bound_key(Some(60)), 1).expect("bound");
        assert_eq!(fresh.find_token(&cache), Some(token(0, 77)));

        let expired = AuthRequirement::TimeBound {
            timeout: Duration::ZERO,
            sids: vec![77],
            auth_type: HardwareAuthenticatorType::PASSWORD,
        };
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(expired.find_token(&cache), None);
    }
}
