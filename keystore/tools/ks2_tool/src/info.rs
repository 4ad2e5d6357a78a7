// Copyright (C) Microsoft Corporation. All rights reserved.

//! Prints the configured backends.

use clap::Parser;
use ks2_keystore::KeystoreService;

use crate::Command;
use crate::ToolCtx;

/// Print the configured backends and their limits
#[derive(Parser)]
#[clap(about = "Print the configured backends")]
pub struct Info {}

impl Command for Info {
    fn run(self, ctx: ToolCtx) -> anyhow::Result<()> {
        let service = KeystoreService::from_config(&ctx.config)?;
        let mut levels = Vec::new();
        for backend in &ctx.config.security_levels {
            let info = service
                .get_security_level(backend.security_level)?
                .hardware_info()?;
            levels.push(serde_json::json!({
                "security_level": info.security_level,
                "name": info.keymint_name,
                "author": info.keymint_author_name,
                "version": info.version_number,
                "backend_max_operations": backend.max_operations,
                "patch_levels": backend.patch_levels,
            }));
        }
        let report = serde_json::json!({
            "max_operations": ctx.config.max_operations,
            "security_levels": levels,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }
}
