pub use ::tracing::*;

use tracing_subscriber::{fmt, EnvFilter};

/// Installs the process wide subscriber. `RUST_LOG` selects the filter and
/// defaults to `info`; output goes to stderr so stdout stays free for data.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
