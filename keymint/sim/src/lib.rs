// Copyright (C) Microsoft Corporation. All rights reserved.

#![warn(missing_docs)]

//! Software implementation of the KeyMint backend.
//!
//! Provides [`SoftKeyMint`], an in-process device backed by OpenSSL. Key
//! blobs are sealed under a per-instance root key, so the device behaves like
//! a hardware backend from the keystore's point of view: blobs are opaque,
//! revocable and version bound.

mod auth;
mod blob;
mod cert;
mod device;
mod error;
mod keys;
mod operation;
mod patch_level;
mod rng;
mod wrap;

pub use device::SimConfig;
pub use device::SoftKeyMint;
pub use patch_level::PatchLevelError;
pub use patch_level::PatchLevels;
pub use wrap::public_key_from_certificate;
pub use wrap::wrap_key;
pub use wrap::KeyDescription;
pub use wrap::WrappedKey;
pub use wrap::TRANSPORT_KEY_LEN;
