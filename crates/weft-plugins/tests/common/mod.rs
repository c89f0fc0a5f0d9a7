//! Common test utilities shared across the `weft-plugins` integration tests.
//!
//! Declared with `mod common;` inside each test file that needs it.

#![allow(dead_code)]

pub mod hosts;

use std::sync::Once;

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness once per binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}
