// Copyright (C) Microsoft Corporation. All rights reserved.

//! Parses a `security_patch.txt` file.

use std::path::PathBuf;

use clap::Parser;
use ks2_keymint_sim::PatchLevels;

use crate::Command;
use crate::ToolCtx;

/// Parse a security patch file and print the resulting levels
#[derive(Parser)]
#[clap(about = "Print the patch levels a security patch file yields")]
pub struct PatchLevel {
    /// Path of the security patch file
    #[clap(long)]
    pub file: PathBuf,
}

impl Command for PatchLevel {
    fn run(self, _ctx: ToolCtx) -> anyhow::Result<()> {
        let text = std::fs::read_to_string(&self.file)?;
        let levels: PatchLevels = text.parse()?;
        tracing::debug!(?levels, file = %self.file.display(), "patch levels parsed");
        println!("{}", serde_json::to_string_pretty(&levels)?);
        Ok(())
    }
}
