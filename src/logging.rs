use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Install the default tracing subscriber for embedding shells and tests.
/// Respects `RUST_LOG`, falling back to `info`. Safe to call more than
/// once; later calls are no-ops.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .try_init();
}
