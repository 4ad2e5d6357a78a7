// Copyright (C) Microsoft Corporation. All rights reserved.

//! Key descriptors: how clients address keys.

use serde::Deserialize;
use serde::Serialize;

use crate::caller::CallerContext;
use crate::error::Error;
use crate::error::KsResult;

/// Addressing domain of a [`KeyDescriptor`].
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Domain {
    /// Caller's own namespace; `nspace` is ignored
    App = 0,

    /// `nspace` is a grant id
    Grant = 1,

    /// `nspace` is a SELinux keystore namespace
    Selinux = 2,

    /// Caller managed key material carried in `blob`
    Blob = 3,

    /// `nspace` is the unique id of a key entry
    KeyId = 4,
}

impl TryFrom<i32> for Domain {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Domain::App),
            1 => Ok(Domain::Grant),
            2 => Ok(Domain::Selinux),
            3 => Ok(Domain::Blob),
            4 => Ok(Domain::KeyId),
            _ => {
                tracing::debug!(domain = value, "unknown domain");
                Err(Error::invalid_arg())
            }
        }
    }
}

/// Client supplied key address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDescriptor {
    /// Addressing domain
    pub domain: Domain,

    /// Domain specific namespace
    pub nspace: i64,

    /// Alias within the namespace
    pub alias: Option<String>,

    /// Key blob, for [`Domain::Blob`]
    pub blob: Option<Vec<u8>>,
}

impl KeyDescriptor {
    /// Key `alias` in the caller's app namespace.
    pub fn app(alias: &str) -> Self {
        Self {
            domain: Domain::App,
            nspace: 0,
            alias: Some(alias.to_string()),
            blob: None,
        }
    }

    /// Key `alias` in SELinux namespace `nspace`.
    pub fn selinux(nspace: i64, alias: &str) -> Self {
        Self {
            domain: Domain::Selinux,
            nspace,
            alias: Some(alias.to_string()),
            blob: None,
        }
    }

    /// Caller managed `blob`, authorized against SELinux namespace `nspace`.
    pub fn blob(nspace: i64, blob: Vec<u8>) -> Self {
        Self {
            domain: Domain::Blob,
            nspace,
            alias: None,
            blob: Some(blob),
        }
    }

    /// Key entry with unique id `id`.
    pub fn key_id(id: i64) -> Self {
        Self {
            domain: Domain::KeyId,
            nspace: id,
            alias: None,
            blob: None,
        }
    }

    /// Key shared through grant `grant_id`.
    pub fn grant(grant_id: i64) -> Self {
        Self {
            domain: Domain::Grant,
            nspace: grant_id,
            alias: None,
            blob: None,
        }
    }

    /// Validates the per-domain fields.
    ///
    /// # Arguments
    /// * `caller` - Identity substituted for [`Domain::App`]
    ///
    /// # Error
    /// * `INVALID_ARGUMENT` - The field the domain relies on is missing
    pub(crate) fn key_ref(&self, caller: &CallerContext) -> KsResult<KeyRef<'_>> {
        let alias = || self.alias.as_deref().ok_or_else(Error::invalid_arg);
        match self.domain {
            Domain::App => Ok(KeyRef::Alias {
                domain: Domain::App,
                nspace: caller.uid as i64,
                alias: alias()?,
            }),
            Domain::Selinux => Ok(KeyRef::Alias {
                domain: Domain::Selinux,
                nspace: self.nspace,
                alias: alias()?,
            }),
            Domain::Grant => Ok(KeyRef::Grant(self.nspace)),
            Domain::KeyId => Ok(KeyRef::KeyId(self.nspace)),
            Domain::Blob => match self.blob.as_deref() {
                Some(blob) => Ok(KeyRef::Blob {
                    nspace: self.nspace,
                    blob,
                }),
                None => Err(Error::invalid_arg()),
            },
        }
    }
}

/// A descriptor after per-domain validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyRef<'a> {
    Alias {
        domain: Domain,
        nspace: i64,
        alias: &'a str,
    },
    Grant(i64),
    KeyId(i64),
    Blob {
        nspace: i64,
        blob: &'a [u8],
    },
}

bitflags::bitflags! {
    /// Key creation flags.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct KeyFlags: i32 {
        /// An auth-bound key is not encrypted with the user's lock screen
        /// derived super key.
        const AUTH_BOUND_WITHOUT_CRYPTOGRAPHIC_LSKF_BINDING = 0x1;
    }
}

/// Raw value of [`KeyFlags::AUTH_BOUND_WITHOUT_CRYPTOGRAPHIC_LSKF_BINDING`].
pub const KEY_FLAG_AUTH_BOUND_WITHOUT_CRYPTOGRAPHIC_LSKF_BINDING: i32 =
    KeyFlags::AUTH_BOUND_WITHOUT_CRYPTOGRAPHIC_LSKF_BINDING.bits();

/// Parses raw creation flags, rejecting reserved bits.
pub(crate) fn check_key_flags(flags: i32) -> KsResult<KeyFlags> {
    KeyFlags::from_bits(flags).ok_or_else(|| {
        tracing::debug!(flags, "reserved key flags set");
        Error::invalid_arg()
    })
}

#[cfg(test)]
mod tests {
    use test_with_tracing::test;

    use super::*;

    #[test]
    fn test_domain_from_raw() {
        assert_eq!(Domain::try_from(0), Ok(Domain::App));
        assert_eq!(Domain::try_from(4), Ok(Domain::KeyId));
        assert_eq!(Domain::try_from(5), Err(Error::invalid_arg()));
        assert_eq!(Domain::try_from(-1), Err(Error::invalid_arg()));
    }

    #[test]
    fn test_app_uses_caller_uid() {
        let caller = CallerContext::new(10_042);
        let mut key = KeyDescriptor::app("k");
        key.nspace = 99;
        assert_eq!(
            key.key_ref(&caller),
            Ok(KeyRef::Alias {
                domain: Domain::App,
                nspace: 10_042,
                alias: "k"
            })
        );
    }

    #[test]
    fn test_missing_fields() {
        let caller = CallerContext::new(10_042);
        let mut key = KeyDescriptor::blob(0, vec![]);
        key.blob = None;
        assert_eq!(key.key_ref(&caller), Err(Error::invalid_arg()));

        let mut key = KeyDescriptor::selinux(7, "k");
        key.alias = None;
        assert_eq!(key.key_ref(&caller), Err(Error::invalid_arg()));
    }

    #[test]
    fn test_key_flags() {
        assert_eq!(check_key_flags(0), Ok(KeyFlags::empty()));
        assert_eq!(
            check_key_flags(KEY_FLAG_AUTH_BOUND_WITHOUT_CRYPTOGRAPHIC_LSKF_BINDING),
            Ok(KeyFlags::AUTH_BOUND_WITHOUT_CRYPTOGRAPHIC_LSKF_BINDING)
        );
        assert_eq!(check_key_flags(0x2), Err(Error::invalid_arg()));
        assert_eq!(check_key_flags(-1), Err(Error::invalid_arg()));
    }
}
