// Copyright (C) Microsoft Corporation. All rights reserved.

//! In-memory key database: key entries, aliases and grants.

use std::collections::HashMap;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use ks2_keymint_interface::KeyParameter;
use ks2_keymint_interface::SecurityLevel;
use parking_lot::RwLock;

use crate::descriptor::Domain;
use crate::descriptor::KeyDescriptor;
use crate::error::Error;
use crate::error::KsResult;
use crate::permission::KeyContext;
use crate::permission::KeyPermSet;
use crate::super_key::EncryptedBlob;
use crate::types::Authorization;
use crate::types::KeyMetadata;

/// Blob as kept at rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StoredBlob {
    Plain(Vec<u8>),
    SuperEncrypted(EncryptedBlob),
}

/// A stored key entry. Entries without a blob hold certificates only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KeyEntry {
    pub id: i64,
    pub domain: Domain,
    pub nspace: i64,
    pub alias: String,
    pub security_level: Option<SecurityLevel>,
    pub blob: Option<StoredBlob>,
    pub authorizations: Vec<Authorization>,
    pub certificate: Option<Vec<u8>>,
    pub certificate_chain: Option<Vec<u8>>,
    pub modification_time_ms: i64,
}

impl KeyEntry {
    pub fn context(&self) -> KsResult<KeyContext> {
        KeyContext::for_namespace(self.domain, self.nspace)
    }

    pub fn key_parameters(&self) -> Vec<KeyParameter> {
        self.authorizations
            .iter()
            .map(|a| a.key_parameter.clone())
            .collect()
    }

    pub fn metadata(&self) -> KeyMetadata {
        KeyMetadata {
            key: KeyDescriptor {
                domain: Domain::KeyId,
                nspace: self.id,
                alias: Some(self.alias.clone()),
                blob: None,
            },
            key_security_level: self.security_level.unwrap_or(SecurityLevel::Software),
            authorizations: self.authorizations.clone(),
            certificate: self.certificate.clone(),
            certificate_chain: self.certificate_chain.clone(),
            modification_time_ms: self.modification_time_ms,
        }
    }
}

/// Contents of a new entry.
#[derive(Debug, Clone)]
pub(crate) struct NewEntry {
    pub security_level: Option<SecurityLevel>,
    pub blob: Option<StoredBlob>,
    pub authorizations: Vec<Authorization>,
    pub certificate: Option<Vec<u8>>,
    pub certificate_chain: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
struct Grant {
    key_id: i64,
    grantee_uid: u32,
    access: KeyPermSet,
}

type AliasKey = (Domain, i64, String);

#[derive(Default)]
struct KeystoreDbInner {
    entries: HashMap<i64, KeyEntry>,
    aliases: HashMap<AliasKey, i64>,
    grants: HashMap<i64, Grant>,
}

impl KeystoreDbInner {
    /// Draws a uniform random id unused by any live entry or grant.
    ///
    /// Ids of removed entries are not remembered; a stale id is reissued
    /// with probability 2^-64 per draw.
    fn unique_id(&self) -> i64 {
        loop {
            let id = rand::random::<i64>();
            if id != 0 && !self.entries.contains_key(&id) && !self.grants.contains_key(&id) {
                return id;
            }
        }
    }

    fn retire(&mut self, key_id: i64) -> Option<KeyEntry> {
        let entry = self.entries.remove(&key_id)?;
        self.grants.retain(|_, g| g.key_id != key_id);
        Some(entry)
    }
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Key database.
///
/// Every call observes and mutates a consistent state; readers get owned
/// snapshots of entries.
#[derive(Default)]
pub(crate) struct KeystoreDb {
    inner: RwLock<KeystoreDbInner>,
}

impl KeystoreDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `alias` to a new entry with a fresh random id.
    ///
    /// # Returns
    /// * `(i64, Option<KeyEntry>)` - New key id and the entry it replaced
    pub fn store_key(
        &self,
        domain: Domain,
        nspace: i64,
        alias: &str,
        new: NewEntry,
    ) -> (i64, Option<KeyEntry>) {
        let mut inner = self.inner.write();
        let id = inner.unique_id();
        let alias_key = (domain, nspace, alias.to_string());
        let replaced = inner
            .aliases
            .insert(alias_key, id)
            .and_then(|old| inner.retire(old));
        inner.entries.insert(
            id,
            KeyEntry {
                id,
                domain,
                nspace,
                alias: alias.to_string(),
                security_level: new.security_level,
                blob: new.blob,
                authorizations: new.authorizations,
                certificate: new.certificate,
                certificate_chain: new.certificate_chain,
                modification_time_ms: now_ms(),
            },
        );
        if let Some(old) = &replaced {
            tracing::debug!(old_id = old.id, new_id = id, alias, "alias rebound");
        } else {
            tracing::debug!(key_id = id, alias, "key bound");
        }
        (id, replaced)
    }

    pub fn load_by_alias(&self, domain: Domain, nspace: i64, alias: &str) -> KsResult<KeyEntry> {
        let inner = self.inner.read();
        inner
            .aliases
            .get(&(domain, nspace, alias.to_string()))
            .and_then(|id| inner.entries.get(id))
            .cloned()
            .ok_or_else(Error::not_found)
    }

    pub fn load_by_id(&self, key_id: i64) -> KsResult<KeyEntry> {
        self.inner
            .read()
            .entries
            .get(&key_id)
            .cloned()
            .ok_or_else(Error::not_found)
    }

    /// Looks up a grant made to `grantee_uid`.
    ///
    /// # Returns
    /// * `(KeyEntry, KeyPermSet)` - Granted key and the granted access
    pub fn load_grant(&self, grant_id: i64, grantee_uid: u32) -> KsResult<(KeyEntry, KeyPermSet)> {
        let inner = self.inner.read();
        let grant = inner
            .grants
            .get(&grant_id)
            .filter(|g| g.grantee_uid == grantee_uid)
            .ok_or_else(Error::not_found)?;
        let entry = inner
            .entries
            .get(&grant.key_id)
            .cloned()
            .ok_or_else(Error::not_found)?;
        Ok((entry, grant.access))
    }

    /// Access granted to `grantee_uid` on `key_id`, if any.
    pub fn granted_access(&self, key_id: i64, grantee_uid: u32) -> Option<KeyPermSet> {
        self.inner
            .read()
            .grants
            .values()
            .find(|g| g.key_id == key_id && g.grantee_uid == grantee_uid)
            .map(|g| g.access)
    }

    pub fn update_blob(&self, key_id: i64, blob: StoredBlob) -> KsResult<()> {
        let mut inner = self.inner.write();
        let entry = inner.entries.get_mut(&key_id).ok_or_else(Error::not_found)?;
        entry.blob = Some(blob);
        entry.modification_time_ms = now_ms();
        Ok(())
    }

    pub fn set_certificates(
        &self,
        key_id: i64,
        certificate: Option<Vec<u8>>,
        certificate_chain: Option<Vec<u8>>,
    ) -> KsResult<()> {
        let mut inner = self.inner.write();
        let entry = inner.entries.get_mut(&key_id).ok_or_else(Error::not_found)?;
        entry.certificate = certificate;
        entry.certificate_chain = certificate_chain;
        entry.modification_time_ms = now_ms();
        Ok(())
    }

    /// Removes an entry, its alias and its grants.
    pub fn unbind(&self, key_id: i64) -> KsResult<KeyEntry> {
        let mut inner = self.inner.write();
        let entry = inner.retire(key_id).ok_or_else(Error::not_found)?;
        inner
            .aliases
            .remove(&(entry.domain, entry.nspace, entry.alias.clone()));
        tracing::debug!(key_id, alias = %entry.alias, "key unbound");
        Ok(entry)
    }

    /// Grants `access` on `key_id` to `grantee_uid`, replacing an earlier
    /// grant between the two.
    pub fn grant(&self, key_id: i64, grantee_uid: u32, access: KeyPermSet) -> KsResult<i64> {
        let mut inner = self.inner.write();
        if !inner.entries.contains_key(&key_id) {
            return Err(Error::not_found());
        }
        let existing = inner
            .grants
            .iter()
            .find(|(_, g)| g.key_id == key_id && g.grantee_uid == grantee_uid)
            .map(|(id, _)| *id);
        let grant_id = existing.unwrap_or_else(|| inner.unique_id());
        inner.grants.insert(
            grant_id,
            Grant {
                key_id,
                grantee_uid,
                access,
            },
        );
        tracing::debug!(key_id, grantee_uid, grant_id, "grant added");
        Ok(grant_id)
    }

    pub fn ungrant(&self, key_id: i64, grantee_uid: u32) -> KsResult<()> {
        let mut inner = self.inner.write();
        let before = inner.grants.len();
        inner
            .grants
            .retain(|_, g| !(g.key_id == key_id && g.grantee_uid == grantee_uid));
        if inner.grants.len() == before {
            return Err(Error::not_found());
        }
        Ok(())
    }

    /// Sorted aliases in a namespace.
    pub fn list(&self, domain: Domain, nspace: i64) -> Vec<String> {
        let inner = self.inner.read();
        let mut aliases: Vec<String> = inner
            .aliases
            .keys()
            .filter(|(d, n, _)| *d == domain && *n == nspace)
            .map(|(_, _, alias)| alias.clone())
            .collect();
        aliases.sort();
        aliases
    }
}

#[cfg(test)]
mod tests {
    use test_with_tracing::test;

    use super::*;

    fn entry(blob: &[u8]) -> NewEntry {
        NewEntry {
            security_level: Some(SecurityLevel::TrustedEnvironment),
            blob: Some(StoredBlob::Plain(blob.to_vec())),
            authorizations: vec![],
            certificate: None,
            certificate_chain: None,
        }
    }

    #[test]
    fn test_rebind_retires_id() {
        let db = KeystoreDb::new();
        let (first, replaced) = db.store_key(Domain::App, 10_001, "k", entry(b"one"));
        assert!(replaced.is_none());
        let (second, replaced) = db.store_key(Domain::App, 10_001, "k", entry(b"two"));
        assert_ne!(first, second);
        assert_eq!(replaced.map(|e| e.id), Some(first));

        assert_eq!(db.load_by_id(first), Err(Error::not_found()));
        let loaded = db.load_by_alias(Domain::App, 10_001, "k").expect("load");
        assert_eq!(loaded.id, second);
        assert_eq!(loaded.blob, Some(StoredBlob::Plain(b"two".to_vec())));
    }

    #[test]
    fn test_rebinds_hold_no_state() {
        let db = KeystoreDb::new();
        for _ in 0..64 {
            let (id, _) = db.store_key(Domain::App, 10_001, "k", entry(b"blob"));
            db.grant(id, 10_002, KeyPermSet::USE).expect("grant");
        }
        let (id, _) = db.store_key(Domain::App, 10_001, "gone", entry(b"blob"));
        db.unbind(id).expect("unbind");

        let inner = db.inner.read();
        assert_eq!(inner.entries.len(), 1);
        assert_eq!(inner.aliases.len(), 1);
        assert_eq!(inner.grants.len(), 1);
    }

    #[test]
    fn test_grants_follow_entry() {
        let db = KeystoreDb::new();
        let (id, _) = db.store_key(Domain::App, 10_001, "k", entry(b"one"));
        let access = KeyPermSet::USE;
        let grant_id = db.grant(id, 10_002, access).expect("grant");
        assert_eq!(db.grant(id, 10_002, access), Ok(grant_id));

        let (granted, perms) = db.load_grant(grant_id, 10_002).expect("load grant");
        assert_eq!(granted.id, id);
        assert!(perms.contains(KeyPermSet::USE));
        assert_eq!(db.load_grant(grant_id, 10_003).err(), Some(Error::not_found()));

        db.store_key(Domain::App, 10_001, "k", entry(b"two"));
        assert_eq!(db.load_grant(grant_id, 10_002).err(), Some(Error::not_found()));
        assert_eq!(db.granted_access(id, 10_002), None);
    }

    #[test]
    fn test_unbind_and_list() {
        let db = KeystoreDb::new();
        db.store_key(Domain::App, 10_001, "b", entry(b"b"));
        let (id, _) = db.store_key(Domain::App, 10_001, "a", entry(b"a"));
        db.store_key(Domain::Selinux, 10_001, "c", entry(b"c"));
        assert_eq!(db.list(Domain::App, 10_001), vec!["a", "b"]);

        assert_eq!(db.unbind(id).map(|e| e.alias), Ok("a".to_string()));
        assert_eq!(db.unbind(id).err(), Some(Error::not_found()));
        assert_eq!(db.list(Domain::App, 10_001), vec!["b"]);
        assert_eq!(db.ungrant(id, 10_002), Err(Error::not_found()));
    }
}
