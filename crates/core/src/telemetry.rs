/// Installs a stderr `tracing` subscriber filtered by `RUST_LOG`, falling back
/// to `default_filter` when the variable is unset or invalid.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .try_init()
        .is_ok()
}
