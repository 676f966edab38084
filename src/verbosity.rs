// Log output control: 0=warnings only, 1=basic, 2=full, 3=trace
use tracing_subscriber::EnvFilter;

/// Filter directive for a verbosity level.
pub fn filter_for_level(level: u8) -> &'static str {
    match level {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the verbosity level.
pub fn init_tracing(level: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_for_level(level)));

    // A subscriber may already be installed (tests, embedding apps).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_map_to_filters() {
        assert_eq!(filter_for_level(0), "warn");
        assert_eq!(filter_for_level(1), "info");
        assert_eq!(filter_for_level(2), "debug");
        assert_eq!(filter_for_level(9), "trace");
    }
}
