//! Shared helpers for the opdag test suites.

pub mod backends;
pub mod builders;

use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Install the test tracing subscriber, once per process.
///
/// Output goes through `with_test_writer`, so it only shows up for failing
/// tests (or with `-- --nocapture`). Levels come from `RUST_LOG` and default
/// to `info`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, panicking if it takes longer than five seconds.
///
/// Every test that waits on queue completion goes through this, so a
/// liveness bug fails the test instead of hanging the suite.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("test future timed out after 5s")
}
