use log::{debug, error, info, log_enabled, warn, Level, LevelFilter};

/// Initializes the logger with the `env_logger` crate.
///
/// The level is taken from `RUST_LOG`; nothing is printed if it is unset.
pub fn init_logger() {
    env_logger::init();
}

/// Initializes `env_logger` with a default level that `RUST_LOG` can still override.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logger_with_level(level: LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init();
}

/// Logs an error message.
pub fn log_error(message: &str) {
    if log_enabled!(Level::Error) {
        error!("{message}");
    }
}

/// Logs a warning message.
pub fn log_warn(message: &str) {
    if log_enabled!(Level::Warn) {
        warn!("{message}");
    }
}

/// Logs an informational message.
pub fn log_info(message: &str) {
    if log_enabled!(Level::Info) {
        info!("{message}");
    }
}

/// Logs a debug message.
pub fn log_debug(message: &str) {
    if log_enabled!(Level::Debug) {
        debug!("{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers_log_at_every_level() {
        init_logger_with_level(LevelFilter::Trace);
        init_logger_with_level(LevelFilter::Off);
        log_error("error message");
        log_warn("warn message");
        log_info("info message");
        log_debug("debug message");
    }
}
