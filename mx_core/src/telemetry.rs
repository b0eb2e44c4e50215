//! ABOUTME: Tracing subscriber setup shared by binaries and tests
//! ABOUTME: Installs the global subscriber once, JSON in production and pretty elsewhere

use std::sync::Once;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Filter used when `RUST_LOG` is not set. sqlx logs every statement at info.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Initialize tracing - safe to call multiple times
pub fn init_tracing(env: &str, service: &str) {
    init_tracing_with_filter(env, service, DEFAULT_FILTER);
}

/// Initialize tracing with an explicit fallback filter directive
pub fn init_tracing_with_filter(env: &str, service: &str, fallback: &str) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

        // try_init: a test harness may already own the global subscriber
        let installed = if env == "production" {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().json())
                .with(env_filter)
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().pretty())
                .with(env_filter)
                .try_init()
        };

        match installed {
            Ok(()) => tracing::info!(service = %service, env = %env, "Tracing initialized"),
            Err(e) => tracing::debug!("Tracing subscriber already installed: {}", e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_idempotent() {
        // Should not panic when called multiple times
        init_tracing("test", "mixrepo-test");
        init_tracing("test", "mixrepo-test");
        init_tracing_with_filter("production", "mixrepo-test", "debug");
    }
}
