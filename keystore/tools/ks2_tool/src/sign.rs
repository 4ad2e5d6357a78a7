// Copyright (C) Microsoft Corporation. All rights reserved.

//! Generates an EC key and signs a message with it.

use clap::Parser;
use ks2_keymint_interface::Algorithm;
use ks2_keymint_interface::Digest;
use ks2_keymint_interface::EcCurve;
use ks2_keymint_interface::KeyParameter;
use ks2_keymint_interface::KeyPurpose;
use ks2_keystore::KeyDescriptor;
use ks2_keystore::KeystoreService;

use crate::Command;
use crate::ToolCtx;

/// Generate a P-256 key under an alias and sign a message
#[derive(Parser)]
#[clap(about = "Sign a message with a fresh EC key")]
pub struct Sign {
    /// Alias of the key in the caller's namespace
    #[clap(long)]
    pub alias: String,

    /// Message to sign
    #[clap(long)]
    pub message: String,
}

impl Command for Sign {
    fn run(self, ctx: ToolCtx) -> anyhow::Result<()> {
        let service = KeystoreService::from_config(&ctx.config)?;
        let level = service.get_security_level(ctx.security_level)?;
        let key = KeyDescriptor::app(&self.alias);
        let params = [
            KeyParameter::Algorithm(Algorithm::Ec),
            KeyParameter::EcCurve(EcCurve::P256),
            KeyParameter::Purpose(KeyPurpose::Sign),
            KeyParameter::Digest(Digest::Sha256),
            KeyParameter::NoAuthRequired,
        ];
        let metadata = level.generate_key(&ctx.caller, &key, None, &params, 0, &[])?;
        tracing::debug!(key_id = metadata.key.nspace, "signing key generated");

        let response = level.create_operation(
            &ctx.caller,
            &key,
            &[
                KeyParameter::Purpose(KeyPurpose::Sign),
                KeyParameter::Digest(Digest::Sha256),
            ],
            false,
        )?;
        let signature = response
            .operation
            .finish(Some(self.message.as_bytes()), None)?
            .unwrap_or_default();

        let report = serde_json::json!({
            "key_id": metadata.key.nspace,
            "certificate": metadata.certificate.map(hex::encode),
            "signature": hex::encode(signature),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }
}
