// Copyright (C) Microsoft Corporation. All rights reserved.

//! Seals a message with AES-GCM and opens it again.

use clap::Parser;
use ks2_keymint_interface::Algorithm;
use ks2_keymint_interface::BlockMode;
use ks2_keymint_interface::KeyParameter;
use ks2_keymint_interface::KeyParameterSet;
use ks2_keymint_interface::KeyPurpose;
use ks2_keymint_interface::PaddingMode;
use ks2_keystore::KeyDescriptor;
use ks2_keystore::KeyManagement;
use ks2_keystore::KeystoreService;

use crate::Command;
use crate::ToolCtx;

const TAG_BITS: u32 = 128;

/// Generate an AES key under an alias, encrypt a message and decrypt it
#[derive(Parser)]
#[clap(about = "Seal and open a message with a fresh AES-GCM key")]
pub struct Seal {
    /// Alias of the key in the caller's namespace
    #[clap(long)]
    pub alias: String,

    /// Message to seal
    #[clap(long)]
    pub message: String,

    /// Associated data bound to the ciphertext
    #[clap(long, default_value = "")]
    pub aad: String,
}

fn gcm_params(purpose: KeyPurpose) -> Vec<KeyParameter> {
    vec![
        KeyParameter::Purpose(purpose),
        KeyParameter::BlockMode(BlockMode::Gcm),
        KeyParameter::Padding(PaddingMode::None),
        KeyParameter::MacLength(TAG_BITS),
    ]
}

impl Seal {
    fn encrypt(
        &self,
        level: &dyn KeyManagement,
        ctx: &ToolCtx,
        key: &KeyDescriptor,
    ) -> anyhow::Result<(Vec<u8>, Vec<u8>)> {
        let response =
            level.create_operation(&ctx.caller, key, &gcm_params(KeyPurpose::Encrypt), false)?;
        let nonce = response
            .parameters
            .as_deref()
            .and_then(|p| p.nonce())
            .ok_or_else(|| anyhow::anyhow!("backend returned no nonce"))?;
        let op = response.operation;
        if !self.aad.is_empty() {
            op.update_aad(self.aad.as_bytes())?;
        }
        let ciphertext = op
            .finish(Some(self.message.as_bytes()), None)?
            .unwrap_or_default();
        Ok((nonce, ciphertext))
    }

    fn decrypt(
        &self,
        level: &dyn KeyManagement,
        ctx: &ToolCtx,
        key: &KeyDescriptor,
        nonce: Vec<u8>,
        ciphertext: &[u8],
    ) -> anyhow::Result<Vec<u8>> {
        let mut params = gcm_params(KeyPurpose::Decrypt);
        params.push(KeyParameter::Nonce(nonce));
        let op = level.create_operation(&ctx.caller, key, &params, false)?.operation;
        if !self.aad.is_empty() {
            op.update_aad(self.aad.as_bytes())?;
        }
        Ok(op.finish(Some(ciphertext), None)?.unwrap_or_default())
    }
}

impl Command for Seal {
    fn run(self, ctx: ToolCtx) -> anyhow::Result<()> {
        let service = KeystoreService::from_config(&ctx.config)?;
        let level = service.get_security_level(ctx.security_level)?;
        let key = KeyDescriptor::app(&self.alias);
        let params = [
            KeyParameter::Algorithm(Algorithm::Aes),
            KeyParameter::KeySize(256),
            KeyParameter::Purpose(KeyPurpose::Encrypt),
            KeyParameter::Purpose(KeyPurpose::Decrypt),
            KeyParameter::BlockMode(BlockMode::Gcm),
            KeyParameter::Padding(PaddingMode::None),
            KeyParameter::MinMacLength(TAG_BITS),
            KeyParameter::NoAuthRequired,
        ];
        level.generate_key(&ctx.caller, &key, None, &params, 0, &[])?;

        let (nonce, ciphertext) = self.encrypt(level.as_ref(), &ctx, &key)?;
        let opened = self.decrypt(level.as_ref(), &ctx, &key, nonce.clone(), &ciphertext)?;
        anyhow::ensure!(
            opened == self.message.as_bytes(),
            "round trip produced different plaintext"
        );

        let report = serde_json::json!({
            "nonce": hex::encode(nonce),
            "ciphertext": hex::encode(ciphertext),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }
}
