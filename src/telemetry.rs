//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, TelemetryConfig};

/// Install the global subscriber. `RUST_LOG` directives are honoured and
/// the configured level is added as the default directive.
///
/// Returns false if a subscriber was already installed.
pub fn init_tracing(config: &TelemetryConfig) -> bool {
    let filter = build_filter(&config.log_level);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match config.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    installed.is_ok()
}

fn build_filter(level: &str) -> EnvFilter {
    let env_filter = EnvFilter::from_default_env();
    match level.parse() {
        Ok(directive) => env_filter.add_directive(directive),
        Err(_) => env_filter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_reported() {
        let config = TelemetryConfig::default();
        // Whichever call installs the subscriber, the later one must fail
        let _ = init_tracing(&config);
        assert!(!init_tracing(&config));
    }

    #[test]
    fn test_bad_level_falls_back() {
        let filter = build_filter("not a level!!");
        assert!(!filter.to_string().contains("not a level"));
    }
}
