use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Layer, Registry};

type FilteredRegistry = Layered<reload::Layer<EnvFilter, Registry>, Registry>;
type FormatLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

/// Handle for re-applying logging settings once the config file is loaded.
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    format: reload::Handle<FormatLayer, FilteredRegistry>,
}

impl LogHandle {
    /// Switch to the configured level and format. `RUST_LOG` still wins.
    pub fn apply(&self, config: &LoggingConfig) {
        // Fails only when another subscriber won the global slot.
        let _ = self.filter.reload(env_filter(&config.level));
        let _ = self.format.reload(format_layer(config.format));
    }
}

/// Build the filter: `RUST_LOG` wins, otherwise the given level for this crate.
fn env_filter(level: &str) -> EnvFilter {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(format!("credential_rotator={level}")),
    }
}

/// Logs go to stderr so the run report on stdout stays machine-readable.
fn format_layer(format: LogFormat) -> FormatLayer {
    match format {
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
        LogFormat::Text => fmt::layer().with_writer(std::io::stderr).boxed(),
    }
}

/// Install the global subscriber with default settings. Call first thing so
/// config loading is logged too, then [`LogHandle::apply`] the loaded config.
pub fn init() -> LogHandle {
    let defaults = LoggingConfig::default();
    let (filter, filter_handle) = reload::Layer::new(env_filter(&defaults.level));
    let (format, format_handle) = reload::Layer::new(format_layer(defaults.format));

    // A subscriber may already be installed (tests, embedding); keep it.
    let _ = tracing_subscriber::registry().with(filter).with(format).try_init();

    LogHandle {
        filter: filter_handle,
        format: format_handle,
    }
}
