use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Diagnostic levels are only emitted when the engine runs with `debug` on.
    pub fn is_diagnostic(self) -> bool {
        matches!(self, LogLevel::Debug | LogLevel::Info)
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

pub trait DiscoveryLogger: Send + Sync {
    fn log(&self, level: LogLevel, component: &str, msg: &str);
}

/// Forwards to the `log` facade, using the component as the log target.
pub struct LogFacadeLogger;

impl LogFacadeLogger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl DiscoveryLogger for LogFacadeLogger {
    fn log(&self, level: LogLevel, component: &str, msg: &str) {
        log::log!(target: component, log::Level::from(level), "{}", msg);
    }
}

/// Installs env_logger for the demo binaries. `RUST_LOG` overrides the default filter.
pub fn init(default_filter: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .try_init();
}
