// Copyright (C) Microsoft Corporation. All rights reserved.

//! Crate for defining tests that have tracing output.

// This is only used by test code; `expect` is allowed (but not `unwrap`).
#![allow(clippy::expect_used)]

#[cfg(test)]
extern crate self as test_with_tracing;

pub use test_with_tracing_macro::test;
use tracing::metadata::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;

/// Crates whose events are shown at `DEBUG` when `RUST_LOG` is unset.
const WORKSPACE_TARGETS: &[&str] = &["ks2_keymint_sim", "ks2_keystore"];

#[doc(hidden)]
/// Initializes `tracing` for tests. Only the first call has an effect.
pub fn init() {
    static ONCE: std::sync::Once = std::sync::Once::new();

    ONCE.call_once(|| {
        let targets = if let Ok(var) = std::env::var("RUST_LOG") {
            var.parse()
                .expect("Failed to parse RUST_LOG environment variable")
        } else {
            WORKSPACE_TARGETS
                .iter()
                .fold(Targets::new().with_default(LevelFilter::INFO), |t, name| {
                    t.with_target(*name, LevelFilter::DEBUG)
                })
        };
        tracing_subscriber::fmt()
            .pretty()
            .with_ansi(false)
            .with_test_writer()
            .with_max_level(LevelFilter::TRACE)
            .with_thread_ids(true)
            .finish()
            .with(targets)
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::test;

    #[test]
    fn events_from_both_facades() {
        tracing::info!("tracing event");
        log::info!("log event");
    }

    #[test]
    fn result_returning_test() -> Result<(), Box<dyn std::error::Error>> {
        tracing::debug!(answer = 42, "structured");
        Ok(())
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn attributes_are_kept() {
        panic!("boom");
    }
}
