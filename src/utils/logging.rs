/// Initialize tracing/logging for the embedding process.
///
/// `RUST_LOG` wins when set; otherwise `default_level` is used. Unknown
/// levels fall back to `info`.
pub fn init(default_level: &str) {
    let lvl = level_from_str(default_level);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(lvl.as_str()));

    // try_init so tests and embedders can call this repeatedly
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

pub(crate) fn level_from_str(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" | "warning" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    }
}
