// Copyright (C) Microsoft Corporation. All rights reserved.

//! Attestation collaborators.

use std::collections::BTreeMap;

use ks2_keymint_interface::AttestationKey;
use ks2_keymint_interface::SecurityLevel;
use serde::Serialize;

use crate::caller::CallerContext;
use crate::error::Error;
use crate::error::KsResult;
use crate::error::ResponseCode;

/// Source of attestation application ids.
pub trait AttestationIdProvider: Send + Sync {
    /// Encoded application id of the packages running as `uid`.
    ///
    /// # Error
    /// * `GET_ATTESTATION_APPLICATION_ID_FAILED` - Lookup failed; retryable
    fn attestation_application_id(&self, uid: u32) -> KsResult<Vec<u8>>;
}

#[derive(Serialize)]
struct ApplicationId<'a> {
    uid: u32,
    packages: &'a [String],
}

/// [`AttestationIdProvider`] backed by a uid to package name table.
#[derive(Debug, Clone, Default)]
pub struct ConfigAttestationIds {
    packages: BTreeMap<u32, Vec<String>>,
}

impl ConfigAttestationIds {
    /// Builds the provider from a uid to package names table.
    pub fn new(packages: BTreeMap<u32, Vec<String>>) -> Self {
        Self { packages }
    }
}

impl AttestationIdProvider for ConfigAttestationIds {
    fn attestation_application_id(&self, uid: u32) -> KsResult<Vec<u8>> {
        let packages = self.packages.get(&uid).ok_or_else(|| {
            tracing::debug!(uid, "no packages for uid");
            Error::Rc(ResponseCode::GetAttestationApplicationIdFailed)
        })?;
        serde_json::to_vec(&ApplicationId { uid, packages }).map_err(|err| {
            tracing::error!(%err, "application id encoding failed");
            Error::sys()
        })
    }
}

/// Attestation key handed out by the provisioning pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotelyProvisionedKey {
    /// Key that signs the new certificate
    pub attestation_key: AttestationKey,

    /// Concatenated DER chain of the attestation key, leaf first
    pub certificate_chain: Vec<u8>,
}

/// Pool of remotely provisioned attestation keys.
pub trait RemoteProvisioning: Send + Sync {
    /// Attestation key for a new key of `caller`, or `None` to self-attest.
    ///
    /// # Error
    /// * `OUT_OF_KEYS_*` - Pool exhausted; see the code for the retry policy
    fn get_attestation_key(
        &self,
        caller: &CallerContext,
        security_level: SecurityLevel,
    ) -> KsResult<Option<RemotelyProvisionedKey>>;
}

/// Provisioning pool that is always empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemoteProvisioning;

impl RemoteProvisioning for NoRemoteProvisioning {
    fn get_attestation_key(
        &self,
        _caller: &CallerContext,
        _security_level: SecurityLevel,
    ) -> KsResult<Option<RemotelyProvisionedKey>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use test_with_tracing::test;

    use super::*;

    #[test]
    fn test_config_ids() {
        let provider = ConfigAttestationIds::new(BTreeMap::from([(
            10_001,
            vec!["com.example.app".to_string()],
        )]));
        let id = provider
            .attestation_application_id(10_001)
            .expect("known uid");
        let decoded: serde_json::Value = serde_json::from_slice(&id).expect("json");
        assert_eq!(decoded["packages"][0], "com.example.app");

        let err = provider.attestation_application_id(10_002).err();
        assert_eq!(
            err,
            Some(Error::Rc(ResponseCode::GetAttestationApplicationIdFailed))
        );
        assert!(err.is_some_and(|e| e.is_transient()));
    }
}
