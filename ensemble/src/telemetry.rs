//! Tracing subscriber bootstrap for binaries and tests embedding the crate.

use tracing_subscriber::EnvFilter;

/// Install a stderr fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (e.g. `"reasoning_ensemble=info"`).
///
/// Returns false when a global subscriber was already installed.
pub fn init_tracing(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        init_tracing("reasoning_ensemble=debug");
        assert!(!init_tracing("reasoning_ensemble=debug"));
    }
}
