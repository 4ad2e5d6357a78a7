// Copyright (C) Microsoft Corporation. All rights reserved.

#![warn(missing_docs)]

//! Key management service over KeyMint backends.
//!
//! Clients address keys through [`KeyDescriptor`]s, create and import keys
//! through the [`KeyManagement`] interface of a security level, and run
//! cryptographic operations through [`KeystoreOperation`] handles. Each
//! security level owns a bounded table of operation slots; when the table is
//! full, the operation of the caller with the highest malus is pruned.
//!
//! Errors are two layered: positive [`ResponseCode`]s describe service
//! failures, negative KeyMint codes are passed through from the backend
//! unchanged.

mod attestation;
mod caller;
mod config;
mod context;
mod database;
mod descriptor;
mod enforcements;
mod error;
mod operation;
mod permission;
mod resolver;
mod security_level;
mod service;
mod super_key;
mod types;

pub use attestation::AttestationIdProvider;
pub use attestation::ConfigAttestationIds;
pub use attestation::NoRemoteProvisioning;
pub use attestation::RemoteProvisioning;
pub use attestation::RemotelyProvisionedKey;
pub use caller::CallerContext;
pub use caller::AID_USER_OFFSET;
pub use config::ConfigError;
pub use config::KeystoreConfig;
pub use config::DEFAULT_MAX_OPERATIONS;
pub use descriptor::Domain;
pub use descriptor::KeyDescriptor;
pub use descriptor::KeyFlags;
pub use descriptor::KEY_FLAG_AUTH_BOUND_WITHOUT_CRYPTOGRAPHIC_LSKF_BINDING;
pub use error::Error;
pub use error::KsResult;
pub use error::ResponseCode;
pub use operation::KeystoreOperation;
pub use operation::OperationState;
pub use operation::MAX_RECEIVE_DATA;
pub use permission::AccessPolicy;
pub use permission::DefaultPolicy;
pub use permission::KeyContext;
pub use permission::KeyPerm;
pub use permission::KeyPermSet;
pub use permission::KeystorePerm;
pub use permission::NamespaceAccess;
pub use permission::PolicyConfig;
pub use permission::PrivilegedUid;
pub use permission::APP_DEFAULT_PERMS;
pub use security_level::KeyManagement;
pub use service::KeystoreService;
pub use super_key::UserState;
pub use types::Authorization;
pub use types::AuthenticatorSpec;
pub use types::AuthenticatorType;
pub use types::CreateOperationResponse;
pub use types::EphemeralStorageKeyResponse;
pub use types::KeyEntryResponse;
pub use types::KeyMetadata;
