// Copyright (C) Microsoft Corporation. All rights reserved.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Command line driver for the key management service.
//!
//! Every invocation builds a fresh in-memory service over software backends,
//! so keys live only for the duration of one command.

use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use ks2_keymint_interface::SecurityLevel;
use ks2_keystore::CallerContext;
use ks2_keystore::KeystoreConfig;
use tracing_subscriber::EnvFilter;

mod info;
mod patch_level;
mod seal;
mod sign;

/// Context shared by every command.
pub struct ToolCtx {
    /// Effective configuration
    pub config: KeystoreConfig,

    /// Identity the commands act as
    pub caller: CallerContext,

    /// Backend the commands use
    pub security_level: SecurityLevel,
}

/// Common trait implemented by all commands.
pub trait Command: Parser {
    /// Run the command.
    fn run(self, ctx: ToolCtx) -> anyhow::Result<()>;
}

/// Backend selector.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Level {
    Software,
    Tee,
    Strongbox,
}

impl From<Level> for SecurityLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Software => SecurityLevel::Software,
            Level::Tee => SecurityLevel::TrustedEnvironment,
            Level::Strongbox => SecurityLevel::StrongBox,
        }
    }
}

#[derive(Parser)]
#[clap(name = "ks2_tool", about = "Key management service driver")]
struct Cli {
    /// JSON configuration file
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Uid to act as
    #[clap(long, global = true, default_value_t = 10_001)]
    uid: u32,

    /// Security level to use
    #[clap(long, global = true, value_enum, default_value_t = Level::Tee)]
    security_level: Level,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Info(info::Info),
    Sign(sign::Sign),
    Seal(seal::Seal),
    PatchLevel(patch_level::PatchLevel),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = try_main() {
        tracing::error!("Error: {:#}", e);
        std::process::exit(-1);
    }
}

fn try_main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => KeystoreConfig::load(path)?,
        None => KeystoreConfig::default(),
    };
    let ctx = ToolCtx {
        config,
        caller: CallerContext::new(cli.uid),
        security_level: cli.security_level.into(),
    };

    match cli.command {
        Commands::Info(cmd) => cmd.run(ctx),
        Commands::Sign(cmd) => cmd.run(ctx),
        Commands::Seal(cmd) => cmd.run(ctx),
        Commands::PatchLevel(cmd) => cmd.run(ctx),
    }
}
