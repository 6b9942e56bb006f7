// Logging setup on top of tracing.
// Log lines go to stderr so a script written to stdout stays clean.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;
use tracing_subscriber::EnvFilter;

static DEBUG: AtomicBool = AtomicBool::new(false);
static INIT: Once = Once::new();

// Install the global subscriber. `RUST_LOG` wins over the --debug flag.
pub fn init(debug: bool) {
    DEBUG.store(debug, Ordering::Relaxed);
    INIT.call_once(|| {
        let default = if debug { "tablediff=debug,warn" } else { "tablediff=info,warn" };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
        // Another subscriber may already be installed (tests, embedding apps).
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

// Returns true if --debug was requested.
pub fn is_debug() -> bool {
    DEBUG.load(Ordering::Relaxed)
}

/// Initialize tracing for test binaries. Safe to call multiple times.
pub fn init_for_tests() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_test_writer()
            .try_init();
    });
}
