//! Logging setup for applications embedding EasyDB.
//!
//! The storage crates only emit `tracing` events (database opened, tables
//! created during an upgrade, failed engine tasks). Nothing is printed until
//! the host installs a subscriber, either its own or the one built here:
//!
//! ```
//! easydb::tracing::init_with_filter("easydb=debug,easydb_sqlite=debug");
//! tracing::info!("{} ready", easydb::tracing::prefix::DB);
//! ```

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter when `RUST_LOG` is unset: facade and engines at `info`.
pub const DEFAULT_FILTER: &str = "easydb=info,easydb_core=info,easydb_sqlite=info";

/// Install the EasyDB subscriber with [`DEFAULT_FILTER`].
///
/// A no-op if the process already has a global subscriber.
pub fn init() {
    init_with_filter(DEFAULT_FILTER);
}

/// Like [`init`] with a custom fallback filter, e.g. `"easydb=debug"`.
/// `RUST_LOG` still wins when set.
pub fn init_with_filter(default_filter: &str) {
    // Hosts and test harnesses often install their own subscriber first.
    let _ = try_init(default_filter);
}

/// Install the subscriber, failing if a global one is already set.
pub fn try_init(default_filter: &str) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_target(true))
        .try_init()
}

/// Log message prefixes.
pub mod prefix {
    /// Database lifecycle (open, upgrade, delete)
    pub const DB: &str = "⊔";
}
