//! Tracing setup for the binary.
//!
//! `RUST_LOG` always wins. Without it the level is `info`, or `debug` in
//! verbose mode. The filter sits behind a reload layer so the `verbose` key
//! of the config file, which is only known after the config has been loaded
//! (and its warnings logged), can still raise the level.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Handle for adjusting the log level after startup.
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

impl LogHandle {
    /// Switch between `debug` and `info`. No effect when `RUST_LOG` is set.
    pub fn set_verbose(&self, verbose: bool) {
        if self.from_env {
            return;
        }
        let _ = self.filter.reload(default_filter(verbose));
    }
}

fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::new(if verbose { "debug" } else { "info" })
}

/// Install the global subscriber, writing to stderr.
pub fn init(verbose: bool) -> LogHandle {
    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (default_filter(verbose), false),
    };
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init()
        .ok(); // Ignore error if already initialized

    LogHandle {
        filter: handle,
        from_env,
    }
}
