use std::env;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::UtcTime;
use tracing::level_filters::LevelFilter;

use crate::config::{Config, LogFormat};

fn get_rust_log(level: LevelFilter) -> &'static str {
    if level == LevelFilter::OFF {
        ""
    } else if level == LevelFilter::ERROR {
        "ERROR"
    } else if level == LevelFilter::WARN {
        "WARN"
    } else if level == LevelFilter::DEBUG {
        "INFO,courier=DEBUG"
    } else if level == LevelFilter::TRACE {
        "INFO,courier=TRACE"
    } else {
        "INFO"
    }
}

/// Initializes logging from the configuration.
///
/// This considers the `RUST_LOG` environment variable and defaults it to the
/// level specified in the configuration. Additionally, this toggles
/// `RUST_BACKTRACE` based on the `enable_backtraces` config value.
pub fn init_logging(config: &Config) {
    if config.logging.enable_backtraces {
        env::set_var("RUST_BACKTRACE", "1");
    }

    let filter = env::var("RUST_LOG")
        .unwrap_or_else(|_| get_rust_log(config.logging.level).to_owned());
    let filter = EnvFilter::new(filter);

    match (config.logging.format, console::user_attended()) {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => fmt()
            .with_timer(UtcTime::rfc_3339())
            .with_env_filter(filter)
            .pretty()
            .init(),
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => fmt()
            .with_timer(UtcTime::rfc_3339())
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        (LogFormat::Json, _) => fmt()
            .with_timer(UtcTime::rfc_3339())
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .with_file(true)
            .with_line_number(true)
            .init(),
    }
}
