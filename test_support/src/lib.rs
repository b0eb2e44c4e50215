//! ABOUTME: Shared testing utilities and helper functions
//! ABOUTME: Unique names, scratch directories, and test log capture for all crates

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Name that is unique within the test binary and across concurrent runs
pub fn unique_name(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}-{}", prefix, std::process::id(), nanos, seq)
}

/// Fresh scratch directory, removed when the guard is dropped
pub fn scratch_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("mixrepo-test")
        .tempdir()
        .expect("failed to create scratch directory")
}

/// Route tracing output through the test harness writer. Safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug,sqlx=warn")),
        )
        .with_test_writer()
        .try_init();
}
