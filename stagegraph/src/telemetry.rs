//! Tracing subscriber setup for binaries and tests embedding the engine.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`. With `json` set, events
/// are written as one JSON object per line. Returns `false` if a global
/// subscriber was already installed, in which case nothing changes.
pub fn init_tracing(default_filter: &str, json: bool) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        let _ = init_tracing("stagegraph=debug", false);
        assert!(!init_tracing("stagegraph=debug", true));
    }
}
