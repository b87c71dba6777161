use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

fn resolve_filter() -> EnvFilter {
    for var in ["MIRROR_LOG", "RUST_LOG"] {
        if let Ok(raw) = std::env::var(var)
            && !raw.trim().is_empty()
            && let Ok(filter) = EnvFilter::try_new(raw.trim())
        {
            return filter;
        }
    }
    EnvFilter::new(DEFAULT_FILTER)
}

/// Install the stderr subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(resolve_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
