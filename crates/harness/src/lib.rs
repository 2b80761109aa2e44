pub mod fixtures;
pub mod network;
pub mod peer;

pub use network::TestNetwork;
pub use peer::{TestPeer, TrackingRecord};

use tracing_subscriber::EnvFilter;

/// Routes engine logs through the test writer. Filter with `RUST_LOG`;
/// defaults to `warn`. Safe to call from every test.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
