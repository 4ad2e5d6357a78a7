// Copyright (C) Microsoft Corporation. All rights reserved.

//! State shared by the service and every security level.

use std::sync::Arc;

use ks2_keymint_interface::KeyMintDevice;
use zeroize::Zeroizing;

use crate::attestation::AttestationIdProvider;
use crate::attestation::RemoteProvisioning;
use crate::database::KeyEntry;
use crate::database::KeystoreDb;
use crate::database::StoredBlob;
use crate::enforcements::AuthTokenCache;
use crate::permission::AccessPolicy;
use crate::super_key::SuperKeyManager;

pub(crate) struct KeystoreContext {
    pub db: KeystoreDb,
    pub policy: Box<dyn AccessPolicy>,
    pub super_keys: SuperKeyManager,
    pub tokens: Arc<AuthTokenCache>,
    pub attestation_ids: Box<dyn AttestationIdProvider>,
    pub remote_provisioning: Box<dyn RemoteProvisioning>,
}

impl KeystoreContext {
    pub fn new(
        policy: Box<dyn AccessPolicy>,
        attestation_ids: Box<dyn AttestationIdProvider>,
        remote_provisioning: Box<dyn RemoteProvisioning>,
    ) -> Self {
        Self {
            db: KeystoreDb::new(),
            policy,
            super_keys: SuperKeyManager::new(),
            tokens: Arc::new(AuthTokenCache::new()),
            attestation_ids,
            remote_provisioning,
        }
    }

    /// Invalidates the blob of a removed entry at its backend.
    ///
    /// Failures are logged and otherwise ignored; the entry is gone either
    /// way.
    pub fn delete_entry_blob(&self, device: &dyn KeyMintDevice, entry: &KeyEntry) {
        let blob = match &entry.blob {
            None => return,
            Some(StoredBlob::Plain(blob)) => Zeroizing::new(blob.clone()),
            Some(StoredBlob::SuperEncrypted(encrypted)) => {
                match self.super_keys.decrypt(encrypted) {
                    Ok(blob) => blob,
                    Err(err) => {
                        tracing::debug!(key_id = entry.id, ?err, "blob left at backend");
                        return;
                    }
                }
            }
        };
        if let Err(err) = device.delete_key(&blob) {
            tracing::debug!(key_id = entry.id, ?err, "backend delete failed");
        }
    }
}
